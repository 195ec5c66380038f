//! # cochain
//!
//! A cooperative scheduler for graphs of elements connected through pads.
//!
//! Linked elements are grouped into chains. Inside a chain every element
//! runs on its own cothread and items cross pads through capacity-one
//! rendezvous slots: the producer deposits and switches to the consumer,
//! the consumer takes and switches back. Links that leave a chain become
//! plain calls into the peer element. Only one cothread of a scheduler runs
//! at a time, so element code needs no locking of its own.
//!
//! ## Features
//!
//! - **Chains**: maintained incrementally as elements and links come and go
//! - **Three element shapes**: custom loop, push (item handler), pull (item producer)
//! - **Select**: wait on several sink pads and take whichever fills first
//! - **Resumable iteration**: `iterate` stops on pending state changes and
//!   picks up where it left off
//! - **Pipeline controller**: named elements, DAG topology, state changes, events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cochain::prelude::*;
//! use cochain::elements::{AppSink, TestSrc};
//!
//! let mut pipeline = Pipeline::new("demo");
//! let src = pipeline.add("src", TestSrc::new().with_num_buffers(10))?;
//! let sink = pipeline.add("sink", AppSink::new())?;
//! pipeline.link(src, sink)?;
//! pipeline.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cothread;
pub mod element;
pub mod elements;
pub mod error;
pub mod item;
pub mod observability;
pub mod pipeline;
pub mod scheduler;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::element::{
        Capability, Element, ElementContext, ElementFlags, PadDirection, PadTemplate,
    };
    pub use crate::error::{Error, Result};
    pub use crate::item::{Buffer, Event, Item};
    pub use crate::pipeline::{Pipeline, PipelineEvent, PipelineState};
    pub use crate::scheduler::{
        ElementId, Graph, IterateState, PadId, Scheduler, SchedulerConfig, StateChangeHandle,
    };
}

pub use error::{Error, Result};
pub use item::{Buffer, Event, Item};
pub use scheduler::{ElementId, Graph, IterateState, PadId, Scheduler, SchedulerConfig};
