//! The cooperative chain scheduler.
//!
//! A [`Scheduler`] drives the elements added to it by grouping linked
//! elements into chains and running each chain's elements on cothreads of
//! one [`CothreadContext`](crate::cothread::CothreadContext). Links inside a
//! chain are capacity-one rendezvous slots; links leaving a chain are plain
//! calls.
//!
//! # Driving
//!
//! The controller builds the graph, enables elements and then calls
//! [`Scheduler::iterate`] until it reports [`IterateState::Done`]:
//!
//! ```rust,ignore
//! let graph = Graph::new();
//! let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
//!
//! let src = graph.add_element("src", TestSrc::new().with_num_buffers(3));
//! let sink = graph.add_element("sink", AppSink::new());
//! sched.add_element(src)?;
//! sched.add_element(sink)?;
//! sched.pad_connect(graph.pad(src, "src")?, graph.pad(sink, "sink")?)?;
//! sched.enable_element(src)?;
//! sched.enable_element(sink)?;
//!
//! while sched.iterate()? != IterateState::Done {}
//! ```
//!
//! # Threads
//!
//! Every cothread is an OS thread, but only one of them (or the controller)
//! runs at a time. Element code never runs concurrently with other element
//! code of the same scheduler, and `iterate` must only be called from the
//! controller.

mod chain;
mod config;
mod registry;
pub(crate) mod rendezvous;
pub(crate) mod runtime;
mod wiring;
mod wrappers;

pub use chain::{ChainInfo, ChainState};
pub use config::{DEFAULT_MAX_COTHREADS, DEFAULT_STACK_SIZE, SchedulerConfig};
pub use registry::{ChainId, ElementId, Graph, PadId, SchedulerId};
pub use runtime::StateChangeHandle;

use crate::cothread::{CothreadContext, CothreadId};
use crate::element::{Capability, ElementFlags};
use crate::error::{Error, Result};
use crate::observability::instrument_iterate;
use registry::Registry;
use runtime::Runtime;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Outcome of [`Scheduler::iterate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterateState {
    /// Every chain ran; more data may be available.
    More,
    /// At least one chain had no element left to run.
    Done,
    /// A state change is pending. Handle it and call `iterate` again to
    /// continue the interrupted sweep.
    Interrupted,
}

/// Progress of the current sweep, kept across interruptions.
#[derive(Debug, Default)]
struct Sweep {
    visited: HashSet<ChainId>,
    exhausted: bool,
}

impl Sweep {
    fn reset(&mut self) {
        self.visited.clear();
        self.exhausted = false;
    }
}

/// Cooperative scheduler for the elements of a [`Graph`].
pub struct Scheduler {
    rt: Arc<Runtime>,
    config: SchedulerConfig,
    sweep: Sweep,
}

impl Scheduler {
    /// Create a scheduler on a graph.
    pub fn new(graph: &Graph, config: SchedulerConfig) -> Self {
        let id = graph.alloc_scheduler_id();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        let cothreads = CothreadContext::new(name.clone(), config.max_cothreads, config.stack_size);
        let rt = Arc::new(Runtime::new(id, name, graph.clone(), cothreads));
        info!(scheduler = %rt.name, max_cothreads = config.max_cothreads, "scheduler created");
        Self {
            rt,
            config,
            sweep: Sweep::default(),
        }
    }

    /// Scheduler id.
    pub fn id(&self) -> SchedulerId {
        self.rt.id
    }

    /// Scheduler name.
    pub fn name(&self) -> &str {
        &self.rt.name
    }

    /// The graph this scheduler works on.
    pub fn graph(&self) -> &Graph {
        &self.rt.graph
    }

    /// The configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handle for requesting a state change from any thread.
    pub fn state_change_handle(&self) -> StateChangeHandle {
        self.rt.state_change.clone()
    }

    /// Start scheduling an element.
    ///
    /// The element gets a singleton chain that is merged with the chains of
    /// linked neighbors already scheduled here. An element owned by another
    /// scheduler is detached from it first. Elements join disabled.
    pub fn add_element(&mut self, element: ElementId) -> Result<()> {
        let mut reg = self.rt.graph.lock();
        reg.join_scheduler(element, self.rt.id)?;
        debug!(scheduler = %self.rt.name, element = %reg.element(element)?.name, "element added");
        self.update_gauges(&reg);
        Ok(())
    }

    /// Stop scheduling an element. No-op if it is not scheduled here.
    pub fn remove_element(&mut self, element: ElementId) -> Result<()> {
        let mut reg = self.rt.graph.lock();
        let ours = reg
            .element(element)
            .is_ok_and(|entry| entry.scheduler == Some(self.rt.id));
        if !ours {
            debug!(scheduler = %self.rt.name, element = %element, "remove of unscheduled element ignored");
            return Ok(());
        }
        reg.detach_element(element)?;
        self.update_gauges(&reg);
        Ok(())
    }

    /// Move an element to its chain's active list and wire the chain if
    /// needed.
    ///
    /// Wiring failures are returned and leave the element disabled.
    pub fn enable_element(&mut self, element: ElementId) -> Result<()> {
        let Some(chain) = self.set_enabled(element, true)? else {
            return Ok(());
        };
        if self.rt.graph.lock().chain_state(chain) == Some(ChainState::Unwired) {
            if let Err(err) = self.wire_chain(chain) {
                let rollback = self.rt.graph.lock().set_enabled(element, false);
                if let Err(rollback) = rollback {
                    warn!(scheduler = %self.rt.name, element = %element, error = %rollback, "could not disable element after failed wiring");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Move an element to its chain's disabled list.
    pub fn disable_element(&mut self, element: ElementId) -> Result<()> {
        self.set_enabled(element, false).map(|_| ())
    }

    fn set_enabled(&mut self, element: ElementId, enabled: bool) -> Result<Option<ChainId>> {
        let mut reg = self.rt.graph.lock();
        let (ours, chain) = match reg.element(element) {
            Ok(entry) => (entry.scheduler == Some(self.rt.id), entry.chain),
            Err(_) => (false, None),
        };
        if !ours {
            warn!(scheduler = %self.rt.name, element = %element, enabled, "element not scheduled here, ignoring");
            return Ok(None);
        }
        reg.set_enabled(element, enabled)?;
        if chain.is_none() {
            debug!(scheduler = %self.rt.name, element = %element, "element is not in any chain");
        }
        Ok(chain)
    }

    /// Link two pads and update chain membership.
    pub fn pad_connect(&mut self, src: PadId, sink: PadId) -> Result<()> {
        let mut reg = self.rt.graph.lock();
        reg.link(src, sink)?;
        let a = reg.pad(src)?.element;
        let b = reg.pad(sink)?.element;

        // Chains belong to the elements' own scheduler, which need not be
        // this one.
        if reg.hop_eligible(a, b) {
            reg.connect_chains(a, b)?;
        } else {
            self.invalidate(&mut reg, &[a, b])?;
        }
        debug!(scheduler = %self.rt.name, src = %src, sink = %sink, "pads connected");
        self.update_gauges(&reg);
        Ok(())
    }

    /// Unlink two pads and regroup the affected chains.
    pub fn pad_disconnect(&mut self, src: PadId, sink: PadId) -> Result<()> {
        let mut reg = self.rt.graph.lock();
        let a = reg.pad(src)?.element;
        let b = reg.pad(sink)?.element;
        let was_chained = reg.hop_eligible(a, b);
        reg.unlink(src, sink)?;

        if was_chained {
            reg.split_chains(&[a, b])?;
        } else {
            self.invalidate(&mut reg, &[a, b])?;
        }
        debug!(scheduler = %self.rt.name, src = %src, sink = %sink, "pads disconnected");
        self.update_gauges(&reg);
        Ok(())
    }

    fn invalidate(&self, reg: &mut Registry, elements: &[ElementId]) -> Result<()> {
        for element in elements {
            if let Some(chain) = reg.element(*element)?.chain {
                reg.mark_unwired(chain);
            }
        }
        Ok(())
    }

    /// The first of `pads` that has an item waiting, without running any
    /// element.
    ///
    /// Element code waits for one of several pads with
    /// [`ElementContext::select`](crate::element::ElementContext::select).
    pub fn pad_select(&self, pads: &[PadId]) -> Result<Option<PadId>> {
        let reg = self.rt.graph.lock();
        for pad in pads {
            if reg.pad(*pad)?.slot.is_some() {
                return Ok(Some(*pad));
            }
        }
        Ok(None)
    }

    /// Drop the items waiting in an element's rendezvous slots.
    pub fn clear_queued(&mut self, element: ElementId) -> Result<usize> {
        self.rt.graph.lock().clear_queued(element)
    }

    /// Run every chain once from its entry element.
    ///
    /// Resumes an interrupted sweep where it stopped. With
    /// [`SchedulerConfig::iterations`] other than 1, several sweeps run per
    /// call.
    pub fn iterate(&mut self) -> Result<IterateState> {
        if !self.rt.cothreads.is_main() {
            return Err(Error::InvalidState(
                "iterate must be called from the controller".into(),
            ));
        }
        let _span = instrument_iterate(&self.rt.name);

        let mut sweeps: i64 = 0;
        loop {
            let state = self.sweep()?;
            if state != IterateState::More {
                return Ok(state);
            }
            sweeps += 1;
            if self.config.iterations >= 0 && sweeps >= self.config.iterations.max(1) {
                return Ok(state);
            }
        }
    }

    fn sweep(&mut self) -> Result<IterateState> {
        if self.interrupt_pending() {
            return Ok(IterateState::Interrupted);
        }

        let chains = self.rt.graph.lock().chains_of(self.rt.id);
        if chains.is_empty() {
            return Ok(IterateState::Done);
        }

        for chain in chains {
            if self.sweep.visited.contains(&chain) {
                continue;
            }
            let state = self.rt.graph.lock().chain_state(chain);
            match state {
                None => continue,
                Some(ChainState::Unwired) => self.wire_chain(chain)?,
                Some(ChainState::Wired) => {}
            }

            let entry = select_entry(&mut self.rt.graph.lock(), chain);
            self.sweep.visited.insert(chain);
            let Some((element, cothread)) = entry else {
                trace!(scheduler = %self.rt.name, chain = %chain, "chain exhausted");
                self.sweep.exhausted = true;
                continue;
            };

            trace!(scheduler = %self.rt.name, chain = %chain, entry = %element, "switching into chain");
            self.rt.switch_to(cothread)?;

            if let Some(err) = self.rt.take_failure() {
                self.sweep.reset();
                return Err(err);
            }
            if self.interrupt_pending() {
                debug!(scheduler = %self.rt.name, chain = %chain, "sweep interrupted");
                return Ok(IterateState::Interrupted);
            }
        }

        let exhausted = self.sweep.exhausted;
        self.sweep.reset();
        self.rt.metrics.record_iteration();
        Ok(if exhausted {
            IterateState::Done
        } else {
            IterateState::More
        })
    }

    fn interrupt_pending(&self) -> bool {
        self.rt.take_interrupt() || self.rt.state_change.is_pending()
    }

    fn wire_chain(&self, chain: ChainId) -> Result<()> {
        let Some(plan) = self.rt.graph.lock().plan_wiring(chain) else {
            return Ok(());
        };
        let weak = Arc::downgrade(&self.rt);
        let cothreads = wiring::spawn_all(&plan, |element, name| {
            self.rt
                .cothreads
                .spawn(name, wrappers::cothread_body(weak.clone(), element))
        })
        .inspect_err(|err| warn!(scheduler = %self.rt.name, chain = %chain, error = %err, "wiring failed"))?;

        let mut reg = self.rt.graph.lock();
        reg.commit_wiring(plan, cothreads);
        self.update_gauges(&reg);
        Ok(())
    }

    fn update_gauges(&self, reg: &Registry) {
        self.rt.metrics.record_chains(reg.chains_of(self.rt.id).len());
        self.rt.metrics.record_cothreads(self.rt.cothreads.allocated());
    }

    /// Snapshots of the chains owned by this scheduler, in creation order.
    pub fn chains(&self) -> Vec<ChainInfo> {
        let reg = self.rt.graph.lock();
        reg.chains_of(self.rt.id)
            .into_iter()
            .filter_map(|chain| reg.chain_info(chain))
            .collect()
    }

    /// Snapshot of one chain.
    pub fn chain(&self, chain: ChainId) -> Option<ChainInfo> {
        self.rt.graph.lock().chain_info(chain)
    }

    /// The chain holding an element, if it is scheduled here.
    pub fn chain_of(&self, element: ElementId) -> Option<ChainId> {
        let reg = self.rt.graph.lock();
        let entry = reg.element(element).ok()?;
        entry.chain.filter(|_| entry.scheduler == Some(self.rt.id))
    }

    /// Elements scheduled here.
    pub fn elements(&self) -> Vec<ElementId> {
        self.rt
            .graph
            .lock()
            .elements
            .iter()
            .filter(|(_, entry)| entry.scheduler == Some(self.rt.id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of live cothreads.
    pub fn cothreads(&self) -> usize {
        self.rt.cothreads.allocated()
    }

    /// Number of cothread switches so far.
    pub fn switches(&self) -> u64 {
        self.rt.cothreads.switches()
    }
}

/// Pick a chain's entry and ask it to stop after one pass.
fn select_entry(reg: &mut Registry, chain: ChainId) -> Option<(ElementId, CothreadId)> {
    let entry = reg.chains.get(&chain)?.active.iter().copied().find(|e| {
        reg.elements.get(e).is_some_and(|entry| {
            entry.enabled
                && !entry.is_decoupled()
                && !entry.flags.contains(ElementFlags::NO_ENTRY)
                && entry.cothread.is_some()
        })
    });
    if let Some(c) = reg.chains.get_mut(&chain) {
        c.entry = entry;
    }
    let element = entry?;
    let cothread = reg.elements.get(&element)?.cothread.as_ref()?;
    cothread.request_stop();
    Some((element, cothread.id()))
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.rt.graph.lock();
        let chains = reg.chains_of(self.rt.id);
        writeln!(
            f,
            "scheduler {} ({}): {} chain(s), {}/{} cothreads",
            self.rt.name,
            self.rt.id,
            chains.len(),
            self.rt.cothreads.allocated(),
            self.rt.cothreads.max_cothreads()
        )?;

        let describe = |element: &ElementId| -> String {
            match reg.elements.get(element) {
                Some(entry) => {
                    let kind = match entry.capability {
                        Some(Capability::Loop) => "loop",
                        Some(Capability::Push) => "push",
                        Some(Capability::Pull) => "pull",
                        None => "unwired",
                    };
                    format!("{} [{}]", entry.name, kind)
                }
                None => element.to_string(),
            }
        };
        let list = |elements: &[ElementId]| -> String {
            if elements.is_empty() {
                "(none)".to_string()
            } else {
                elements.iter().map(describe).collect::<Vec<_>>().join(", ")
            }
        };

        for chain in chains.iter().filter_map(|c| reg.chains.get(c)) {
            let state = match chain.state {
                ChainState::Unwired => "unwired",
                ChainState::Wired => "wired",
            };
            let entry = chain
                .entry
                .and_then(|e| reg.elements.get(&e))
                .map_or("-", |entry| entry.name.as_str());
            writeln!(
                f,
                "  {} ({}, {} cothreads, entry {})",
                chain.id, state, chain.num_cothreads, entry
            )?;
            writeln!(f, "    active: {}", list(&chain.active))?;
            writeln!(f, "    disabled: {}", list(&chain.disabled))?;
        }

        let decoupled: Vec<ElementId> = reg
            .elements
            .iter()
            .filter(|(_, entry)| entry.scheduler == Some(self.rt.id) && entry.chain.is_none())
            .map(|(id, _)| *id)
            .collect();
        if !decoupled.is_empty() {
            writeln!(f, "  unchained: {}", list(&decoupled))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.rt.id)
            .field("name", &self.rt.name)
            .field("config", &self.config)
            .field("cothreads", &self.rt.cothreads)
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut reg = self.rt.graph.lock();
            for chain in reg.chains_of(self.rt.id) {
                reg.destroy_chain(chain);
            }
            let ours: Vec<ElementId> = reg
                .elements
                .iter()
                .filter(|(_, entry)| entry.scheduler == Some(self.rt.id))
                .map(|(id, _)| *id)
                .collect();
            for element in ours {
                if let Err(err) = reg.detach_element(element) {
                    warn!(scheduler = %self.rt.name, element = %element, error = %err, "could not detach element");
                }
            }
        }
        self.rt.cothreads.shutdown();
        debug!(scheduler = %self.rt.name, "scheduler dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementContext, PadTemplate};
    use crate::item::{Buffer, Item};

    struct Counter {
        remaining: u64,
    }

    impl Element for Counter {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::src("src")]
        }

        fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Buffer::from_sequence(self.remaining).into()))
        }
    }

    struct Drain {
        seen: Arc<std::sync::Mutex<Vec<Item>>>,
    }

    impl Element for Drain {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::sink("sink")]
        }

        fn handle_item(&mut self, _pad: PadId, item: Item, _ctx: &mut ElementContext<'_>) -> Result<()> {
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[test]
    fn test_iterate_without_chains_is_done() {
        let graph = Graph::new();
        let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
        assert_eq!(sched.iterate().unwrap(), IterateState::Done);
    }

    #[test]
    fn test_disabled_element_exhausts_chain() {
        let graph = Graph::new();
        let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
        let src = graph.add_element("src", Counter { remaining: 1 });
        sched.add_element(src).unwrap();
        assert_eq!(sched.iterate().unwrap(), IterateState::Done);
    }

    #[test]
    fn test_source_to_sink_runs_to_eos() {
        let graph = Graph::new();
        let mut sched = Scheduler::new(&graph, SchedulerConfig::run_to_completion());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let src = graph.add_element("src", Counter { remaining: 3 });
        let sink = graph.add_element("sink", Drain { seen: Arc::clone(&seen) });
        sched.add_element(src).unwrap();
        sched.add_element(sink).unwrap();
        sched
            .pad_connect(graph.pad(src, "src").unwrap(), graph.pad(sink, "sink").unwrap())
            .unwrap();
        sched.enable_element(src).unwrap();
        sched.enable_element(sink).unwrap();

        assert_eq!(sched.iterate().unwrap(), IterateState::Done);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen[3].is_eos());
        assert!(graph.is_eos(src).unwrap());
        assert!(graph.is_eos(sink).unwrap());
    }

    #[test]
    fn test_show_lists_chains() {
        let graph = Graph::new();
        let mut sched = Scheduler::new(&graph, SchedulerConfig::default().with_name("dump"));
        let src = graph.add_element("numbers", Counter { remaining: 1 });
        sched.add_element(src).unwrap();
        sched.enable_element(src).unwrap();

        let dump = sched.to_string();
        assert!(dump.starts_with("scheduler dump"));
        assert!(dump.contains("numbers [pull]"));
        assert!(dump.contains("wired"));
    }

    #[test]
    fn test_enable_of_foreign_element_is_noop() {
        let graph = Graph::new();
        let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
        let src = graph.add_element("src", Counter { remaining: 1 });
        sched.enable_element(src).unwrap();
        assert!(!graph.is_enabled(src).unwrap());
        sched.remove_element(src).unwrap();
    }
}
