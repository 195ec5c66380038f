//! Pad descriptions for element inputs and outputs.
//!
//! Pads are the connection points of elements. The scheduler owns the live
//! pad records (see [`Graph`](crate::scheduler::Graph)); this module only
//! describes the shape of the pads an element wants.

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// A source pad: items leave the element here.
    Src,
    /// A sink pad: items enter the element here.
    Sink,
}

impl PadDirection {
    /// The direction a peer pad must have.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad exists from the start or is added on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is created together with the element.
    Always,
    /// Pad is added later through [`Graph::add_pad`](crate::scheduler::Graph::add_pad).
    Request,
}

/// Template for creating pads.
///
/// Only `Always` templates are instantiated when an element is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadTemplate {
    /// Pad name (e.g., "src", "sink", "sink_%u").
    pub name: String,
    /// Direction of this pad.
    pub direction: PadDirection,
    /// Whether this pad is always present or created on request.
    pub presence: PadPresence,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(name: impl Into<String>, direction: PadDirection, presence: PadPresence) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
        }
    }

    /// Template for an always-present source pad.
    pub fn src(name: impl Into<String>) -> Self {
        Self::new(name, PadDirection::Src, PadPresence::Always)
    }

    /// Template for an always-present sink pad.
    pub fn sink(name: impl Into<String>) -> Self {
        Self::new(name, PadDirection::Sink, PadPresence::Always)
    }

    /// Template for sink pads created on request.
    pub fn request_sink(name: impl Into<String>) -> Self {
        Self::new(name, PadDirection::Sink, PadPresence::Request)
    }

    /// Template for source pads created on request.
    pub fn request_src(name: impl Into<String>) -> Self {
        Self::new(name, PadDirection::Src, PadPresence::Request)
    }
}

/// How items cross a pad.
///
/// Assigned when a chain is wired. Pads start out `Direct` and go back to
/// `Direct` when unlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Items are handed straight to the peer element by a plain call.
    #[default]
    Direct,
    /// Items go through a capacity-one slot, with a cothread switch to the peer.
    Rendezvous,
}
