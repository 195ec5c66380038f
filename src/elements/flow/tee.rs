//! Tee element for 1-to-N fanout.

use super::request_pad;
use crate::element::{Element, ElementContext, PadDirection, PadTemplate};
use crate::error::Result;
use crate::item::Item;
use crate::scheduler::{ElementId, Graph, PadId};

/// A tee element that copies every item to all of its outputs.
///
/// Outputs are request pads named `src_0`, `src_1`, and so on, served in
/// creation order. Unlinked outputs are skipped. Buffers share their
/// payload, so a copy is cheap.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::Tee;
///
/// let tee = graph.add_element("tee", Tee::new());
/// let out0 = Tee::request_pad(&graph, tee)?;
/// let out1 = Tee::request_pad(&graph, tee)?;
/// ```
pub struct Tee {
    name: String,
}

impl Tee {
    /// Create a new tee.
    pub fn new() -> Self {
        Self {
            name: "tee".to_string(),
        }
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a new output pad to a tee already in `graph`.
    pub fn request_pad(graph: &Graph, tee: ElementId) -> Result<PadId> {
        request_pad(graph, tee, "src", PadDirection::Src)
    }
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for Tee {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink"), PadTemplate::request_src("src_%u")]
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, ctx: &mut ElementContext<'_>) -> Result<()> {
        if item.is_eos() {
            return Ok(());
        }
        let outputs: Vec<PadId> = ctx
            .pads(PadDirection::Src)
            .into_iter()
            .filter(|pad| ctx.is_linked(*pad))
            .collect();
        for pad in outputs {
            ctx.push(pad, item.clone())?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
