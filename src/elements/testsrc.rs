//! TestSrc element for generating test patterns.
//!
//! Generates buffers filled with simple patterns, mostly for tests and
//! benchmarks.

use crate::element::{Element, ElementContext, PadTemplate};
use crate::error::Result;
use crate::item::{Buffer, Item};
use crate::scheduler::PadId;
use bytes::Bytes;

/// Test pattern types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestPattern {
    /// All zeros.
    #[default]
    Zero,
    /// All ones (0xFF).
    Ones,
    /// Incrementing bytes (0, 1, 2, ..., 255, 0, 1, ...).
    Counter,
    /// Alternating 0x55/0xAA pattern.
    Alternating,
    /// Sequence number repeated to fill the buffer.
    Sequence,
}

/// A pull source that generates test pattern buffers.
///
/// Has a single `src` pad. Once `num_buffers` buffers have been produced it
/// reports end of stream.
///
/// # Example
///
/// ```rust,ignore
/// use cochain::elements::{TestPattern, TestSrc};
///
/// // 100 buffers of 1KB zeros
/// let src = TestSrc::new()
///     .with_pattern(TestPattern::Zero)
///     .with_buffer_size(1024)
///     .with_num_buffers(100);
/// ```
pub struct TestSrc {
    name: String,
    pattern: TestPattern,
    buffer_size: usize,
    num_buffers: Option<u64>,
    sequence: u64,
    bytes_produced: u64,
    counter: u8,
}

impl TestSrc {
    /// Create a new test source with default settings.
    pub fn new() -> Self {
        Self {
            name: "testsrc".to_string(),
            pattern: TestPattern::default(),
            buffer_size: 4096,
            num_buffers: None,
            sequence: 0,
            bytes_produced: 0,
            counter: 0,
        }
    }

    /// Set the element name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the test pattern.
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the buffer size in bytes.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Stop after this many buffers. Unlimited by default.
    pub fn with_num_buffers(mut self, count: u64) -> Self {
        self.num_buffers = Some(count);
        self
    }

    /// Buffers produced so far.
    pub fn buffers_produced(&self) -> u64 {
        self.sequence
    }

    /// Bytes produced so far.
    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }

    fn fill(&mut self, data: &mut [u8]) {
        match self.pattern {
            TestPattern::Zero => data.fill(0),
            TestPattern::Ones => data.fill(0xFF),
            TestPattern::Counter => {
                for byte in data.iter_mut() {
                    *byte = self.counter;
                    self.counter = self.counter.wrapping_add(1);
                }
            }
            TestPattern::Alternating => {
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = if i % 2 == 0 { 0x55 } else { 0xAA };
                }
            }
            TestPattern::Sequence => {
                let seq = self.sequence.to_le_bytes();
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = seq[i % seq.len()];
                }
            }
        }
    }

    /// Produce the next buffer, or `None` once the limit is reached.
    pub fn next_buffer(&mut self) -> Option<Buffer> {
        if self.num_buffers.is_some_and(|max| self.sequence >= max) {
            return None;
        }
        let mut data = vec![0u8; self.buffer_size];
        self.fill(&mut data);
        let buffer = Buffer::new(Bytes::from(data), self.sequence);
        self.sequence += 1;
        self.bytes_produced += self.buffer_size as u64;
        Some(buffer)
    }
}

impl Default for TestSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for TestSrc {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src")]
    }

    fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        Ok(self.next_buffer().map(Item::from))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
