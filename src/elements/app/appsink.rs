//! AppSink element for extracting data to application code.
//!
//! Collects what reaches it so the application can read it between
//! iterations.

use crate::element::{Element, ElementContext, PadTemplate};
use crate::error::Result;
use crate::item::{Buffer, Event, Item};
use crate::scheduler::PadId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A sink element that lets applications take buffers out of a graph.
///
/// Buffers are queued internally and read through an [`AppSinkHandle`].
/// Events other than end of stream are kept in a separate log.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::AppSink;
///
/// let app_sink = AppSink::new();
/// let handle = app_sink.handle();
///
/// // scheduler iterates...
///
/// while let Some(buffer) = handle.try_pull_buffer() {
///     // Process buffer
/// }
/// ```
pub struct AppSink {
    name: String,
    inner: Arc<Mutex<AppSinkState>>,
}

struct AppSinkState {
    queue: VecDeque<Buffer>,
    events: Vec<Event>,
    max_buffers: usize,
    eos: bool,
    total_received: u64,
    total_pulled: u64,
    total_dropped: u64,
}

impl AppSink {
    /// Create a new AppSink with an unbounded queue.
    pub fn new() -> Self {
        Self {
            name: "appsink".to_string(),
            inner: Arc::new(Mutex::new(AppSinkState {
                queue: VecDeque::new(),
                events: Vec::new(),
                max_buffers: usize::MAX,
                eos: false,
                total_received: 0,
                total_pulled: 0,
                total_dropped: 0,
            })),
        }
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keep at most this many buffers; older ones are dropped.
    pub fn with_max_buffers(self, max: usize) -> Self {
        lock(&self.inner).max_buffers = max.max(1);
        self
    }

    /// Get a handle for pulling buffers.
    pub fn handle(&self) -> AppSinkHandle {
        AppSinkHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for AppSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AppSinkState {
    fn receive(&mut self, item: Item) {
        match item {
            Item::Buffer(buffer) => {
                self.total_received += 1;
                if self.queue.len() >= self.max_buffers {
                    self.queue.pop_front();
                    self.total_dropped += 1;
                }
                self.queue.push_back(buffer);
            }
            Item::Event(Event::Eos) => self.eos = true,
            Item::Event(Event::Flush) => {
                self.total_dropped += self.queue.len() as u64;
                self.queue.clear();
                self.events.push(Event::Flush);
            }
            Item::Event(event) => self.events.push(event),
        }
    }
}

fn lock(inner: &Mutex<AppSinkState>) -> MutexGuard<'_, AppSinkState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Element for AppSink {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink")]
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, _ctx: &mut ElementContext<'_>) -> Result<()> {
        lock(&self.inner).receive(item);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handle for pulling data from an AppSink.
///
/// This handle can be cloned and sent to other threads.
#[derive(Clone)]
pub struct AppSinkHandle {
    inner: Arc<Mutex<AppSinkState>>,
}

impl AppSinkHandle {
    /// Take the oldest queued buffer, if any.
    pub fn try_pull_buffer(&self) -> Option<Buffer> {
        let mut state = lock(&self.inner);
        let buffer = state.queue.pop_front();
        if buffer.is_some() {
            state.total_pulled += 1;
        }
        buffer
    }

    /// Take every queued buffer.
    pub fn drain(&self) -> Vec<Buffer> {
        let mut state = lock(&self.inner);
        state.total_pulled += state.queue.len() as u64;
        state.queue.drain(..).collect()
    }

    /// Sequence numbers of the queued buffers, oldest first.
    pub fn sequences(&self) -> Vec<u64> {
        lock(&self.inner).queue.iter().map(Buffer::sequence).collect()
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Check if no buffers are queued.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).queue.is_empty()
    }

    /// Events received so far, end of stream excluded.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.inner).events.clone()
    }

    /// Whether end of stream has arrived.
    pub fn is_eos(&self) -> bool {
        lock(&self.inner).eos
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSinkStats {
        let state = lock(&self.inner);
        AppSinkStats {
            queued: state.queue.len(),
            total_received: state.total_received,
            total_pulled: state.total_pulled,
            total_dropped: state.total_dropped,
        }
    }
}

/// Statistics for AppSink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppSinkStats {
    /// Buffers currently queued.
    pub queued: usize,
    /// Buffers received from upstream.
    pub total_received: u64,
    /// Buffers taken through a handle.
    pub total_pulled: u64,
    /// Buffers dropped because the queue was full or flushed.
    pub total_dropped: u64,
}
