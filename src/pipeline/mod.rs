//! Pipeline construction and control.
//!
//! - [`Pipeline`]: named elements, links and state changes on top of a
//!   [`Scheduler`](crate::scheduler::Scheduler)
//! - [`PipelineState`]: `Null`, `Ready`, `Paused`, `Playing`
//! - [`PipelineEvent`]: events emitted while the pipeline is driven
//!
//! # Example
//!
//! ```rust,ignore
//! use cochain::elements::{AppSink, Identity, TestSrc};
//! use cochain::pipeline::Pipeline;
//!
//! let mut pipeline = Pipeline::new("demo");
//! let src = pipeline.add("src", TestSrc::new().with_num_buffers(100))?;
//! let filter = pipeline.add("filter", Identity::new())?;
//! let sink = AppSink::new();
//! let handle = sink.handle();
//! let sink = pipeline.add("sink", sink)?;
//!
//! pipeline.link(src, filter)?;
//! pipeline.link(filter, sink)?;
//! pipeline.run()?;
//! assert!(handle.is_eos());
//! ```

mod events;
mod graph;

pub use events::{EventReceiver, EventSender, PipelineEvent};
pub use graph::{LinkInfo, Pipeline, PipelineState};
