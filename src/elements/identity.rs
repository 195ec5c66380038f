//! Identity element with callbacks for debugging.
//!
//! A pass-through element that allows inspection of buffers via callbacks.

use crate::element::{Element, ElementContext, PadTemplate};
use crate::error::Result;
use crate::item::{Buffer, Item};
use crate::scheduler::PadId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback type for buffer inspection.
pub type BufferCallback = Box<dyn Fn(&Buffer) + Send + Sync>;

/// An identity element that passes items through unchanged while
/// optionally calling a callback for every buffer.
///
/// Counters live behind a shared [`IdentityStatsHandle`], so they stay
/// readable after the element has been handed to a graph.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::Identity;
///
/// let identity = Identity::new()
///     .with_name("debug-point")
///     .on_buffer(|buf| {
///         println!("Buffer: seq={}, len={}", buf.sequence(), buf.len());
///     });
/// let stats = identity.stats_handle();
/// ```
pub struct Identity {
    name: String,
    callback: Option<Arc<BufferCallback>>,
    counters: Arc<Counters>,
    src: Option<PadId>,
}

#[derive(Default)]
struct Counters {
    buffers: AtomicU64,
    bytes: AtomicU64,
    events: AtomicU64,
}

impl Identity {
    /// Create a new identity element.
    pub fn new() -> Self {
        Self {
            name: "identity".to_string(),
            callback: None,
            counters: Arc::new(Counters::default()),
            src: None,
        }
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a callback to be called for each buffer.
    pub fn on_buffer<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Get a handle for reading the counters.
    pub fn stats_handle(&self) -> IdentityStatsHandle {
        IdentityStatsHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> IdentityStats {
        self.stats_handle().stats()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for Identity {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink"), PadTemplate::src("src")]
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, ctx: &mut ElementContext<'_>) -> Result<()> {
        // End of stream is forwarded by the scheduler.
        if item.is_eos() {
            return Ok(());
        }
        match &item {
            Item::Buffer(buffer) => {
                if let Some(cb) = &self.callback {
                    cb(buffer);
                }
                self.counters.buffers.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes
                    .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            }
            Item::Event(_) => {
                self.counters.events.fetch_add(1, Ordering::Relaxed);
            }
        }
        let src = match self.src {
            Some(pad) => pad,
            None => *self.src.insert(ctx.pad("src")?),
        };
        ctx.push(src, item)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared view of an [`Identity`]'s counters.
#[derive(Clone)]
pub struct IdentityStatsHandle {
    counters: Arc<Counters>,
}

impl IdentityStatsHandle {
    /// Get statistics.
    pub fn stats(&self) -> IdentityStats {
        IdentityStats {
            buffer_count: self.counters.buffers.load(Ordering::Relaxed),
            byte_count: self.counters.bytes.load(Ordering::Relaxed),
            event_count: self.counters.events.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for Identity element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentityStats {
    /// Number of buffers processed.
    pub buffer_count: u64,
    /// Total bytes processed.
    pub byte_count: u64,
    /// Events passed through (end of stream excluded).
    pub event_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults() {
        let identity = Identity::new();
        assert_eq!(Element::name(&identity), "identity");
        assert_eq!(identity.stats(), IdentityStats::default());
        assert_eq!(identity.pad_templates().len(), 2);
    }

    #[test]
    fn test_identity_with_name() {
        let identity = Identity::new().with_name("tap");
        assert_eq!(Element::name(&identity), "tap");
    }

    #[test]
    fn test_stats_handle_shares_counters() {
        let identity = Identity::new();
        let handle = identity.stats_handle();
        identity.counters.buffers.fetch_add(2, Ordering::Relaxed);
        assert_eq!(handle.stats().buffer_count, 2);
    }
}
