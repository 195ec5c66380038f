//! Flow control elements.
//!
//! - [`Queue`]: decouples two chains with an item buffer
//! - [`Funnel`]: merges N inputs into one, whichever is ready first
//! - [`Tee`]: copies one input to N outputs

mod funnel;
mod queue;
mod tee;

pub use funnel::Funnel;
pub use queue::{LeakyMode, Queue, QueueStats, QueueStatsHandle};
pub use tee::Tee;

use crate::element::PadDirection;
use crate::error::Result;
use crate::scheduler::{ElementId, Graph, PadId};

/// Create the next numbered request pad (`{prefix}_{n}`) on an element.
fn request_pad(
    graph: &Graph,
    element: ElementId,
    prefix: &str,
    direction: PadDirection,
) -> Result<PadId> {
    let taken = graph
        .pads(element)?
        .into_iter()
        .filter(|pad| {
            graph
                .pad_name(*pad)
                .is_ok_and(|name| name.starts_with(&format!("{prefix}_")))
        })
        .count();
    graph.add_pad(element, format!("{prefix}_{taken}"), direction)
}
