//! NullSink element that discards everything.

use crate::element::{Element, ElementContext, PadTemplate};
use crate::error::Result;
use crate::item::Item;
use crate::scheduler::PadId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A sink that drops every item it receives, counting buffers.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::NullSink;
///
/// let sink = NullSink::new();
/// let count = sink.counter();
/// // ... after iterating
/// println!("received {}", count.buffers());
/// ```
pub struct NullSink {
    name: String,
    counter: NullSinkCounter,
}

impl NullSink {
    /// Create a new null sink.
    pub fn new() -> Self {
        Self {
            name: "nullsink".to_string(),
            counter: NullSinkCounter::default(),
        }
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shared counter that stays readable after the sink joined a graph.
    pub fn counter(&self) -> NullSinkCounter {
        self.counter.clone()
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for NullSink {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink")]
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, _ctx: &mut ElementContext<'_>) -> Result<()> {
        match item {
            Item::Buffer(buffer) => {
                self.counter.buffers.fetch_add(1, Ordering::Relaxed);
                self.counter
                    .bytes
                    .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            }
            item if item.is_eos() => self.counter.eos.store(true, Ordering::Relaxed),
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Counters of a [`NullSink`].
#[derive(Debug, Clone, Default)]
pub struct NullSinkCounter {
    buffers: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    eos: Arc<AtomicBool>,
}

impl NullSinkCounter {
    /// Buffers received.
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Payload bytes received.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Whether end of stream arrived.
    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }
}
