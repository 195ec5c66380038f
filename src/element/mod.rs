//! Element system for cochain graphs.
//!
//! This module defines what the scheduler needs from an element:
//!
//! - [`Element`]: the entry points the scheduler calls
//! - [`Capability`]: how the element is driven (loop, push or pull)
//! - [`ElementFlags`]: decoupled and no-entry markers
//! - [`PadTemplate`]: the pads the element wants
//! - [`ElementContext`]: the pad interface element code pushes and pulls through
//!
//! # Example
//!
//! ```rust,ignore
//! use cochain::element::{Element, ElementContext, PadTemplate};
//! use cochain::{Item, PadId, Result};
//!
//! // A filter: driven by the push wrapper because it has a sink pad.
//! struct Passthrough;
//!
//! impl Element for Passthrough {
//!     fn pad_templates(&self) -> Vec<PadTemplate> {
//!         vec![PadTemplate::sink("sink"), PadTemplate::src("src")]
//!     }
//!
//!     fn handle_item(&mut self, _pad: PadId, item: Item, ctx: &mut ElementContext<'_>) -> Result<()> {
//!         if item.is_eos() {
//!             return Ok(());
//!         }
//!         let src = ctx.pad("src")?;
//!         ctx.push(src, item)
//!     }
//! }
//! ```

mod context;
mod pad;
mod traits;

pub use context::ElementContext;
pub use pad::{PadDirection, PadMode, PadPresence, PadTemplate};
pub use traits::{Capability, Element, ElementFlags};
