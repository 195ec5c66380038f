//! Error types for cochain.

use crate::cothread::CothreadId;
use crate::scheduler::{ElementId, PadId};
use thiserror::Error;

/// Result type alias using cochain's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cochain operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The element id does not name a live element.
    #[error("element {0} not found")]
    ElementNotFound(ElementId),

    /// The pad id does not name a live pad.
    #[error("pad {0} not found")]
    PadNotFound(PadId),

    /// No pad with the given name exists on the element.
    #[error("element '{element}' has no pad named '{pad}'")]
    NoSuchPad {
        /// Element name.
        element: String,
        /// Requested pad name.
        pad: String,
    },

    /// The requested link is not allowed.
    #[error("invalid link: {0}")]
    InvalidLink(String),

    /// The pad has no peer.
    #[error("pad {0} is not linked")]
    NotLinked(PadId),

    /// The cothread context cannot hold another cothread.
    #[error("cothread limit reached: {max} cothreads already allocated")]
    CothreadsExhausted {
        /// Configured limit.
        max: usize,
    },

    /// The operating system refused to create a cothread.
    #[error("failed to spawn cothread: {0}")]
    CothreadSpawn(#[source] std::io::Error),

    /// A switch targeted a cothread that has been destroyed.
    #[error("cothread {0} is gone")]
    CothreadGone(CothreadId),

    /// The running cothread was cancelled and must unwind.
    #[error("cothread context shut down")]
    Shutdown,

    /// A synchronous call re-entered an element that is already running.
    #[error("deadlock detected: element '{0}' is already running on this context")]
    Deadlock(String),

    /// An element entry point failed.
    #[error("element '{element}' failed: {source}")]
    Element {
        /// Name of the failing element.
        element: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Element code panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The element does not implement the requested entry point.
    #[error("element does not implement {0}")]
    Unsupported(&'static str),

    /// Data flow error raised by an element.
    #[error("flow error: {0}")]
    Flow(String),

    /// Operation not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Pipeline construction error.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}
