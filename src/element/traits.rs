//! The element trait and its scheduling attributes.

use super::context::ElementContext;
use super::pad::PadTemplate;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::scheduler::PadId;

/// Scheduling flags of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ElementFlags(u32);

impl ElementFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);
    /// The element buffers internally and runs independently of its
    /// neighbors. It is never part of a chain.
    pub const DECOUPLED: Self = Self(1 << 0);
    /// The element must never be chosen as a chain's entry.
    pub const NO_ENTRY: Self = Self(1 << 1);

    /// Create empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check if empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if contains a flag.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ElementFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// How the scheduler drives an element.
///
/// Fixed when the element's chain is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The element supplies its own loop ([`Element::run_loop`]).
    Loop,
    /// Items are pulled from every sink pad and handed to
    /// [`Element::handle_item`].
    Push,
    /// The element has no sink pads; items are requested from
    /// [`Element::produce_item`] and pushed out of each source pad.
    Pull,
}

impl Capability {
    /// Classify an element.
    ///
    /// A custom loop wins. Otherwise an element without sink pads that is
    /// not decoupled is pull-driven, and everything else is push-driven.
    pub fn classify(has_loop: bool, decoupled: bool, sink_pads: usize) -> Self {
        if has_loop {
            Capability::Loop
        } else if !decoupled && sink_pads == 0 {
            Capability::Pull
        } else {
            Capability::Push
        }
    }
}

/// A processing node in the graph.
///
/// Every entry point gets an [`ElementContext`] through which the element
/// moves items across its pads. Which entry point is used depends on the
/// element's [`Capability`]; the others keep their defaults.
///
/// Elements driven by the scheduler never forward `Eos` themselves. The
/// scheduler does that once the element's inputs are exhausted (or, for loop
/// elements, when they call [`ElementContext::set_eos`]).
pub trait Element: Send {
    /// Pads created when the element is registered.
    fn pad_templates(&self) -> Vec<PadTemplate> {
        Vec::new()
    }

    /// Scheduling flags.
    fn flags(&self) -> ElementFlags {
        ElementFlags::NONE
    }

    /// Whether the element supplies its own loop.
    fn has_loop(&self) -> bool {
        false
    }

    /// One step of a custom loop.
    ///
    /// Called repeatedly while the element's cothread runs.
    fn run_loop(&mut self, ctx: &mut ElementContext<'_>) -> Result<()> {
        let _ = ctx;
        Err(Error::Unsupported("run_loop"))
    }

    /// Accept an item that arrived on a sink pad.
    fn handle_item(&mut self, pad: PadId, item: Item, ctx: &mut ElementContext<'_>) -> Result<()> {
        let _ = (pad, item, ctx);
        Err(Error::Unsupported("handle_item"))
    }

    /// Produce the next item for a source pad.
    ///
    /// Returns `Ok(None)` when the element has nothing more (end of stream).
    fn produce_item(&mut self, pad: PadId, ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        let _ = (pad, ctx);
        Err(Error::Unsupported("produce_item"))
    }

    /// Get the name of this element type (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = ElementFlags::DECOUPLED | ElementFlags::NO_ENTRY;
        assert!(flags.contains(ElementFlags::DECOUPLED));
        assert!(flags.contains(ElementFlags::NO_ENTRY));
        assert!(!ElementFlags::NONE.contains(ElementFlags::DECOUPLED));
        assert!(ElementFlags::empty().is_empty());
    }

    #[test]
    fn test_classification() {
        assert_eq!(Capability::classify(true, false, 2), Capability::Loop);
        assert_eq!(Capability::classify(true, true, 0), Capability::Loop);
        assert_eq!(Capability::classify(false, false, 0), Capability::Pull);
        assert_eq!(Capability::classify(false, false, 1), Capability::Push);
        // Decoupled elements are never pull-driven.
        assert_eq!(Capability::classify(false, true, 0), Capability::Push);
    }

    struct Inert;

    impl Element for Inert {}

    #[test]
    fn test_default_entry_points_unsupported() {
        let el = Inert;
        assert!(el.pad_templates().is_empty());
        assert!(!el.has_loop());
        assert_eq!(el.flags(), ElementFlags::NONE);
        assert!(el.name().ends_with("Inert"));
    }
}
