//! Data items that travel between pads.
//!
//! The scheduler never looks inside an item except to recognize the two
//! events it acts on: [`Event::Eos`] disables elements once their inputs are
//! exhausted, and [`Event::Flush`] replaces whatever is waiting in a
//! rendezvous slot.

use bytes::Bytes;
use std::fmt;

/// A block of payload bytes with a sequence number.
///
/// Cloning is cheap (reference-counted payload).
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    sequence: u64,
}

impl Buffer {
    /// Create a buffer from payload bytes.
    pub fn new(data: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sequence,
        }
    }

    /// Create an empty buffer carrying only a sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self::new(Bytes::new(), sequence)
    }

    /// Payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequence number assigned by the producer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Out-of-band signals that travel in-band with buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// End of stream: no more data will follow on this pad.
    Eos,
    /// Discard anything queued ahead of this event.
    Flush,
    /// Application-defined event.
    Custom(String),
}

impl Event {
    /// Human-readable event name.
    pub fn name(&self) -> &str {
        match self {
            Event::Eos => "eos",
            Event::Flush => "flush",
            Event::Custom(name) => name,
        }
    }
}

/// One unit of data handed from a source pad to a sink pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Payload data.
    Buffer(Buffer),
    /// In-band event.
    Event(Event),
}

impl Item {
    /// Shorthand for an end-of-stream item.
    pub fn eos() -> Self {
        Item::Event(Event::Eos)
    }

    /// Whether this item is the end-of-stream event.
    pub fn is_eos(&self) -> bool {
        matches!(self, Item::Event(Event::Eos))
    }

    /// Whether this item is a flush event.
    pub fn is_flush(&self) -> bool {
        matches!(self, Item::Event(Event::Flush))
    }

    /// The buffer, if this item carries one.
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Item::Buffer(buffer) => Some(buffer),
            Item::Event(_) => None,
        }
    }

    /// Consume the item, returning the buffer if it carries one.
    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Item::Buffer(buffer) => Some(buffer),
            Item::Event(_) => None,
        }
    }
}

impl From<Buffer> for Item {
    fn from(buffer: Buffer) -> Self {
        Item::Buffer(buffer)
    }
}

impl From<Event> for Item {
    fn from(event: Event) -> Self {
        Item::Event(event)
    }
}
