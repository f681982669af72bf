use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One decoded frame, ready to be handed to a dispatch task.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based position in the source stream.
    pub sequence: u64,
    /// Encoded image payload.
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
}

/// Hands out gap-free, 1-based frame sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&mut self, data: Bytes) -> Frame {
        self.last += 1;
        Frame {
            sequence: self.last,
            data,
            captured_at: Utc::now(),
        }
    }

    pub fn emitted(&self) -> u64 {
        self.last
    }
}
