//! Frame types on both ends of the transport

use bytes::Bytes;
use std::time::Duration;

/// One encoded image handed over by the capture collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Encoded image bytes (JPEG in the reference deployment)
    pub payload: Bytes,
    /// Capture time in nanoseconds since the source started
    pub timestamp_ns: u64,
}

impl EncodedFrame {
    pub fn new(payload: Bytes, timestamp_ns: u64) -> Self {
        Self {
            payload,
            timestamp_ns,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A frame rebuilt by the reassembler from all of its chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame {
    pub frame_id: u32,
    pub payload: Bytes,
    /// Time between the first chunk arriving and the frame completing
    pub assembly_time: Duration,
}

impl ReassembledFrame {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
