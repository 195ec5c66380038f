//! Queue element for decoupling chains.
//!
//! A queue is flagged [`ElementFlags::DECOUPLED`]: it never joins a chain and
//! never gets a cothread. Its upstream and downstream neighbours call into it
//! directly, so the two sides end up in separate chains that the scheduler
//! drives independently.

use crate::element::{Element, ElementContext, ElementFlags, PadTemplate};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::scheduler::PadId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Refuse new items with a flow error (default).
    #[default]
    None,
    /// Drop new items when full (upstream leaky).
    Upstream,
    /// Drop old items when full (downstream leaky).
    Downstream,
}

/// A queue element that buffers items between two chains.
///
/// End of stream is queued like data and reaches downstream in order.
/// A flush empties the queue before being queued itself.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::{LeakyMode, Queue};
///
/// let queue = Queue::new(100).leaky(LeakyMode::Downstream);
/// let stats = queue.stats_handle();
/// ```
pub struct Queue {
    name: String,
    items: VecDeque<Item>,
    max_items: usize,
    leaky: LeakyMode,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    level: AtomicUsize,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

impl Queue {
    /// Create a new queue holding at most `max_items` items.
    pub fn new(max_items: usize) -> Self {
        Self {
            name: "queue".to_string(),
            items: VecDeque::with_capacity(max_items.min(256)),
            max_items: max_items.max(1),
            leaky: LeakyMode::default(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Set leaky mode.
    pub fn leaky(mut self, mode: LeakyMode) -> Self {
        self.leaky = mode;
        self
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get a handle for reading statistics after the queue joined a graph.
    pub fn stats_handle(&self) -> QueueStatsHandle {
        QueueStatsHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> QueueStats {
        self.stats_handle().stats()
    }

    /// Add an item, applying the leaky policy when full.
    pub fn enqueue(&mut self, item: Item) -> Result<()> {
        if item.is_flush() {
            let dropped = self.items.len() as u64;
            self.items.clear();
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
            trace!(queue = %self.name, dropped, "queue flushed");
        } else if self.items.len() >= self.max_items {
            match self.leaky {
                LeakyMode::None => {
                    return Err(Error::Flow(format!(
                        "queue '{}' is full ({} items)",
                        self.name, self.max_items
                    )));
                }
                LeakyMode::Upstream => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                LeakyMode::Downstream => {
                    self.items.pop_front();
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.items.push_back(item);
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        self.counters.level.store(self.items.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Take the oldest item.
    pub fn dequeue(&mut self) -> Option<Item> {
        let item = self.items.pop_front()?;
        self.counters.popped.fetch_add(1, Ordering::Relaxed);
        self.counters.level.store(self.items.len(), Ordering::Relaxed);
        Some(item)
    }
}

impl Element for Queue {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink"), PadTemplate::src("src")]
    }

    fn flags(&self) -> ElementFlags {
        ElementFlags::DECOUPLED
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, _ctx: &mut ElementContext<'_>) -> Result<()> {
        self.enqueue(item)
    }

    fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        Ok(self.dequeue())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared view of a [`Queue`]'s counters.
#[derive(Clone)]
pub struct QueueStatsHandle {
    counters: Arc<Counters>,
}

impl QueueStatsHandle {
    /// Get statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_items: self.counters.level.load(Ordering::Relaxed),
            total_pushed: self.counters.pushed.load(Ordering::Relaxed),
            total_popped: self.counters.popped.load(Ordering::Relaxed),
            total_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Current number of items in the queue.
    pub current_items: usize,
    /// Total items pushed to the queue.
    pub total_pushed: u64,
    /// Total items popped from the queue.
    pub total_popped: u64,
    /// Total items dropped (leaky mode or flush).
    pub total_dropped: u64,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(200)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("len", &self.items.len())
            .field("max_items", &self.max_items)
            .field("leaky", &self.leaky)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Buffer, Event};

    fn buf(seq: u64) -> Item {
        Buffer::from_sequence(seq).into()
    }

    fn seq(item: Item) -> u64 {
        item.into_buffer().map(|b| b.sequence()).unwrap()
    }

    #[test]
    fn test_queue_fifo() {
        let mut queue = Queue::new(10);
        for i in 0..5 {
            queue.enqueue(buf(i)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(seq(queue.dequeue().unwrap()), i);
        }
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_errors() {
        let mut queue = Queue::new(1);
        queue.enqueue(buf(0)).unwrap();
        assert!(matches!(queue.enqueue(buf(1)), Err(Error::Flow(_))));
    }

    #[test]
    fn test_leaky_upstream() {
        let mut queue = Queue::new(2).leaky(LeakyMode::Upstream);
        for i in 0..4 {
            queue.enqueue(buf(i)).unwrap();
        }
        assert_eq!(seq(queue.dequeue().unwrap()), 0);
        assert_eq!(seq(queue.dequeue().unwrap()), 1);
        assert_eq!(queue.stats().total_dropped, 2);
    }

    #[test]
    fn test_leaky_downstream() {
        let mut queue = Queue::new(2).leaky(LeakyMode::Downstream);
        for i in 0..4 {
            queue.enqueue(buf(i)).unwrap();
        }
        assert_eq!(seq(queue.dequeue().unwrap()), 2);
        assert_eq!(seq(queue.dequeue().unwrap()), 3);
    }

    #[test]
    fn test_flush_empties_then_queues_flush() {
        let mut queue = Queue::new(4);
        queue.enqueue(buf(0)).unwrap();
        queue.enqueue(buf(1)).unwrap();
        queue.enqueue(Event::Flush.into()).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.dequeue().unwrap().is_flush());
        assert_eq!(queue.stats().total_dropped, 2);
    }

    #[test]
    fn test_eos_is_queued_in_order() {
        let mut queue = Queue::new(4);
        queue.enqueue(buf(0)).unwrap();
        queue.enqueue(Item::eos()).unwrap();
        assert!(!queue.dequeue().unwrap().is_eos());
        assert!(queue.dequeue().unwrap().is_eos());
    }

    #[test]
    fn test_queue_is_decoupled() {
        let queue = Queue::default();
        assert!(queue.flags().contains(ElementFlags::DECOUPLED));
        let handle = queue.stats_handle();
        assert_eq!(handle.stats(), QueueStats::default());
    }
}
