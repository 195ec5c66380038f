//! Pipeline controller over a scheduler, with its topology kept in daggy.

use super::events::{EventReceiver, EventSender, PipelineEvent};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::observability::{span_pipeline, trace_state_change};
use crate::scheduler::{
    ElementId, Graph, IterateState, PadId, Scheduler, SchedulerConfig, StateChangeHandle,
};
use daggy::{Dag, NodeIndex, Walker};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// State of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum PipelineState {
    /// Nothing scheduled to run, queues empty.
    #[default]
    Null,
    /// Elements disabled, queues empty.
    Ready,
    /// Elements disabled, queued items kept.
    Paused,
    /// Elements enabled; `iterate` moves data.
    Playing,
}

impl PipelineState {
    fn as_str(self) -> &'static str {
        match self {
            PipelineState::Null => "null",
            PipelineState::Ready => "ready",
            PipelineState::Paused => "paused",
            PipelineState::Playing => "playing",
        }
    }
}

/// A link between two elements of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// Upstream element.
    pub src: ElementId,
    /// Source pad on `src`.
    pub src_pad: PadId,
    /// Downstream element.
    pub sink: ElementId,
    /// Sink pad on `sink`.
    pub sink_pad: PadId,
}

/// A graph of named elements driven by one [`Scheduler`].
///
/// The pipeline mirrors the pad links in a DAG so cycles are rejected
/// before they reach the scheduler, and translates state changes into
/// enabling and disabling elements.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::{AppSink, TestSrc};
/// use cochain::pipeline::{Pipeline, PipelineState};
///
/// let mut pipeline = Pipeline::new("demo");
/// let src = pipeline.add("src", TestSrc::new().with_num_buffers(10))?;
/// let sink = pipeline.add("sink", AppSink::new())?;
/// pipeline.link(src, sink)?;
/// pipeline.run()?;
/// ```
pub struct Pipeline {
    name: String,
    graph: Graph,
    scheduler: Scheduler,
    dag: Dag<ElementId, LinkInfo>,
    nodes: HashMap<ElementId, NodeIndex>,
    by_name: HashMap<String, ElementId>,
    state: PipelineState,
    events: EventSender,
    eos_sent: bool,
}

impl Pipeline {
    /// Create an empty pipeline with a default scheduler configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, SchedulerConfig::default())
    }

    /// Create an empty pipeline whose scheduler uses `config`.
    ///
    /// The scheduler is named after the pipeline unless `config` names it.
    pub fn with_config(name: impl Into<String>, config: SchedulerConfig) -> Self {
        let name = name.into();
        let config = match config.name {
            Some(_) => config,
            None => config.with_name(name.clone()),
        };
        let graph = Graph::new();
        let scheduler = Scheduler::new(&graph, config);
        Self {
            name,
            graph,
            scheduler,
            dag: Dag::new(),
            nodes: HashMap::new(),
            by_name: HashMap::new(),
            state: PipelineState::Null,
            events: EventSender::default(),
            eos_sent: false,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The scheduler driving the pipeline.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Get the current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Subscribe to pipeline events.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Handle for interrupting `iterate` from another thread.
    pub fn state_change_handle(&self) -> StateChangeHandle {
        self.scheduler.state_change_handle()
    }

    /// Add an element under a unique name.
    ///
    /// In the `Playing` state the element is enabled right away.
    pub fn add(&mut self, name: impl Into<String>, element: impl Element + 'static) -> Result<ElementId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::Pipeline(format!("element name '{name}' already in use")));
        }
        let id = self.graph.add_element(name.clone(), element);
        if let Err(err) = self.scheduler.add_element(id) {
            if let Err(cleanup) = self.graph.remove_element(id) {
                warn!(pipeline = %self.name, element = %name, error = %cleanup, "could not remove unscheduled element");
            }
            return Err(err);
        }
        let node = self.dag.add_node(id);
        self.nodes.insert(id, node);
        self.by_name.insert(name, id);
        if self.state == PipelineState::Playing {
            self.scheduler.enable_element(id)?;
        }
        Ok(id)
    }

    /// Get an element by name.
    pub fn element(&self, name: &str) -> Option<ElementId> {
        self.by_name.get(name).copied()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pipeline has no elements.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, element: ElementId) -> Result<NodeIndex> {
        self.nodes
            .get(&element)
            .copied()
            .ok_or(Error::ElementNotFound(element))
    }

    /// Link two elements through their `src` and `sink` pads.
    pub fn link(&mut self, src: ElementId, sink: ElementId) -> Result<()> {
        self.link_pads(src, "src", sink, "sink")
    }

    /// Link two elements through named pads.
    pub fn link_pads(
        &mut self,
        src: ElementId,
        src_pad: &str,
        sink: ElementId,
        sink_pad: &str,
    ) -> Result<()> {
        let src_node = self.node(src)?;
        let sink_node = self.node(sink)?;
        let link = LinkInfo {
            src,
            src_pad: self.graph.pad(src, src_pad)?,
            sink,
            sink_pad: self.graph.pad(sink, sink_pad)?,
        };

        // Add edge (daggy ensures no cycles)
        let edge = self
            .dag
            .add_edge(src_node, sink_node, link)
            .map_err(|_| Error::InvalidLink("linking would create a cycle".into()))?;
        if let Err(err) = self.scheduler.pad_connect(link.src_pad, link.sink_pad) {
            self.dag.remove_edge(edge);
            return Err(err);
        }
        debug!(pipeline = %self.name, src = %src_pad, sink = %sink_pad, "elements linked");
        Ok(())
    }

    /// Remove every link from `src` to `sink`.
    pub fn unlink(&mut self, src: ElementId, sink: ElementId) -> Result<()> {
        let src_node = self.node(src)?;
        let sink_node = self.node(sink)?;
        let mut removed = 0;
        while let Some(edge) = self.dag.find_edge(src_node, sink_node) {
            let Some(link) = self.dag.remove_edge(edge) else {
                break;
            };
            self.scheduler.pad_disconnect(link.src_pad, link.sink_pad)?;
            removed += 1;
        }
        if removed == 0 {
            warn!(pipeline = %self.name, src = %src, sink = %sink, "elements were not linked");
        }
        Ok(())
    }

    /// Remove an element and all of its links.
    pub fn remove(&mut self, element: ElementId) -> Result<()> {
        let node = self.node(element)?;
        self.graph.remove_element(element)?;

        let last = NodeIndex::new(self.dag.node_count() - 1);
        self.dag.remove_node(node);
        // The last node takes the removed node's index.
        if node != last {
            if let Some(moved) = self.dag.node_weight(node) {
                self.nodes.insert(*moved, node);
            }
        }
        self.nodes.remove(&element);
        self.by_name.retain(|_, id| *id != element);
        Ok(())
    }

    /// All links, in no particular order.
    pub fn links(&self) -> Vec<LinkInfo> {
        self.dag
            .raw_edges()
            .iter()
            .map(|edge| edge.weight)
            .collect()
    }

    /// Elements with no upstream links.
    pub fn sources(&self) -> Vec<ElementId> {
        self.nodes
            .iter()
            .filter(|(_, node)| self.dag.parents(**node).walk_next(&self.dag).is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Elements with no downstream links.
    pub fn sinks(&self) -> Vec<ElementId> {
        self.nodes
            .iter()
            .filter(|(_, node)| self.dag.children(**node).walk_next(&self.dag).is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Move the pipeline to `target`.
    ///
    /// `Playing` enables every element (wiring chains as needed), `Paused`
    /// disables them, `Ready` and `Null` also drop queued items.
    pub fn set_state(&mut self, target: PipelineState) -> Result<()> {
        let from = self.state;
        if from == target {
            return Ok(());
        }
        let elements: Vec<ElementId> = self.nodes.keys().copied().collect();
        match target {
            PipelineState::Playing => {
                for element in &elements {
                    self.scheduler.enable_element(*element)?;
                }
                self.eos_sent = false;
            }
            PipelineState::Paused => {
                for element in &elements {
                    self.scheduler.disable_element(*element)?;
                }
            }
            PipelineState::Ready | PipelineState::Null => {
                for element in &elements {
                    self.scheduler.disable_element(*element)?;
                    self.scheduler.clear_queued(*element)?;
                }
            }
        }
        self.state = target;
        trace_state_change(&self.name, from.as_str(), target.as_str());
        self.events.send_state_changed(from, target);
        Ok(())
    }

    /// Run the scheduler once and report what happened as events.
    pub fn iterate(&mut self) -> Result<IterateState> {
        match self.scheduler.iterate() {
            Ok(state) => {
                self.events.send(PipelineEvent::Iterated { state });
                match state {
                    IterateState::Interrupted => {
                        self.events.send(PipelineEvent::Interrupted);
                    }
                    IterateState::Done if !self.eos_sent => {
                        self.eos_sent = true;
                        self.events.send_eos();
                    }
                    _ => {}
                }
                Ok(state)
            }
            Err(err) => {
                let element = match &err {
                    Error::Element { element, .. } => Some(element.clone()),
                    _ => None,
                };
                self.events.send_error(err.to_string(), element);
                Err(err)
            }
        }
    }

    /// Play the pipeline and iterate until it is done or interrupted.
    pub fn run(&mut self) -> Result<IterateState> {
        let _span = span_pipeline(&self.name).entered();
        self.set_state(PipelineState::Playing)?;
        loop {
            match self.iterate()? {
                IterateState::More => continue,
                state => return Ok(state),
            }
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pipeline {} [{}]: {} element(s), {} link(s)",
            self.name,
            self.state.as_str(),
            self.nodes.len(),
            self.dag.edge_count()
        )?;
        write!(f, "{}", self.scheduler)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("elements", &self.nodes.len())
            .field("links", &self.dag.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{AppSink, Identity, TestSrc};

    #[test]
    fn test_duplicate_names_rejected() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add("a", Identity::new()).unwrap();
        let err = pipeline.add("a", Identity::new()).unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut pipeline = Pipeline::new("p");
        let a = pipeline.add("a", Identity::new()).unwrap();
        let b = pipeline.add("b", Identity::new()).unwrap();
        pipeline.link(a, b).unwrap();
        let err = pipeline.link(b, a).unwrap_err();
        assert!(matches!(err, Error::InvalidLink(_)));
        assert_eq!(pipeline.links().len(), 1);
    }

    #[test]
    fn test_sources_and_sinks() {
        let mut pipeline = Pipeline::new("p");
        let src = pipeline.add("src", TestSrc::new()).unwrap();
        let mid = pipeline.add("mid", Identity::new()).unwrap();
        let sink = pipeline.add("sink", AppSink::new()).unwrap();
        pipeline.link(src, mid).unwrap();
        pipeline.link(mid, sink).unwrap();
        assert_eq!(pipeline.sources(), vec![src]);
        assert_eq!(pipeline.sinks(), vec![sink]);
    }

    #[test]
    fn test_remove_keeps_index_map_consistent() {
        let mut pipeline = Pipeline::new("p");
        let a = pipeline.add("a", Identity::new()).unwrap();
        let b = pipeline.add("b", Identity::new()).unwrap();
        let c = pipeline.add("c", Identity::new()).unwrap();
        pipeline.remove(a).unwrap();
        assert_eq!(pipeline.element("a"), None);
        assert_eq!(pipeline.len(), 2);
        // c moved into a's slot and must still be linkable.
        pipeline.link(b, c).unwrap();
        assert_eq!(pipeline.links().len(), 1);
        assert_eq!(pipeline.links()[0].sink, c);
    }

    #[test]
    fn test_state_changes_emit_events() {
        let mut pipeline = Pipeline::new("p");
        let mut rx = pipeline.events();
        pipeline.set_state(PipelineState::Ready).unwrap();
        pipeline.set_state(PipelineState::Ready).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert_eq!(
            rx.drain(),
            vec![PipelineEvent::StateChanged {
                from: PipelineState::Null,
                to: PipelineState::Ready
            }]
        );
    }
}
