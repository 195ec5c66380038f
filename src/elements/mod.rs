//! Stock elements.
//!
//! | Element | Kind | Pads |
//! |---------|------|------|
//! | [`TestSrc`] | pull source | `src` |
//! | [`Identity`] | push filter | `sink`, `src` |
//! | [`Tee`] | push filter | `sink`, `src_%u` |
//! | [`Funnel`] | loop | `sink_%u`, `src` |
//! | [`Queue`] | decoupled | `sink`, `src` |
//! | [`AppSink`] | push sink | `sink` |
//! | [`NullSink`] | push sink | `sink` |

pub mod app;
pub mod flow;
mod identity;
mod null;
mod testsrc;

pub use app::{AppSink, AppSinkHandle, AppSinkStats};
pub use flow::{Funnel, LeakyMode, Queue, QueueStats, QueueStatsHandle, Tee};
pub use identity::{BufferCallback, Identity, IdentityStats, IdentityStatsHandle};
pub use null::{NullSink, NullSinkCounter};
pub use testsrc::{TestPattern, TestSrc};
