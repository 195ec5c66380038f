//! Funnel element for merging multiple inputs into one output.
//!
//! N-to-1 pipe fitting that forwards items from whichever input is ready.

use super::request_pad;
use crate::element::{Element, ElementContext, PadDirection, PadTemplate};
use crate::error::Result;
use crate::scheduler::{ElementId, Graph, PadId};

/// A funnel element that merges multiple inputs into a single output.
///
/// Runs its own loop: it waits on all unfinished inputs with
/// [`ElementContext::select`] and forwards the first item that shows up.
/// Inputs are request pads named `sink_0`, `sink_1`, and so on. The output
/// ends once every linked input has reached end of stream.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::Funnel;
///
/// let funnel = graph.add_element("funnel", Funnel::new());
/// let in0 = Funnel::request_pad(&graph, funnel)?;
/// let in1 = Funnel::request_pad(&graph, funnel)?;
/// ```
pub struct Funnel {
    name: String,
    forwarded: u64,
}

impl Funnel {
    /// Create a new funnel.
    pub fn new() -> Self {
        Self {
            name: "funnel".to_string(),
            forwarded: 0,
        }
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Items forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Add a new input pad to a funnel already in `graph`.
    pub fn request_pad(graph: &Graph, funnel: ElementId) -> Result<PadId> {
        request_pad(graph, funnel, "sink", PadDirection::Sink)
    }
}

impl Default for Funnel {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for Funnel {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src"), PadTemplate::request_sink("sink_%u")]
    }

    fn has_loop(&self) -> bool {
        true
    }

    fn run_loop(&mut self, ctx: &mut ElementContext<'_>) -> Result<()> {
        let src = ctx.pad("src")?;
        let inputs: Vec<PadId> = ctx
            .pads(PadDirection::Sink)
            .into_iter()
            .filter(|pad| ctx.is_linked(*pad) && !ctx.is_eos(*pad))
            .collect();
        if inputs.is_empty() {
            return ctx.set_eos();
        }

        let ready = ctx.select(&inputs)?;
        match ctx.pull(ready)? {
            // Producers are paused; try again next time round.
            None => Ok(()),
            Some(item) if item.is_eos() => {
                ctx.mark_eos(ready)?;
                if ctx.inputs_finished() {
                    ctx.set_eos()?;
                }
                Ok(())
            }
            Some(item) => {
                self.forwarded += 1;
                ctx.push(src, item)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
