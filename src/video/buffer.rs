//! Bounded frame hand-off between the receive thread and the consumer
//!
//! Live video never waits for a slow consumer: when the queue is full the
//! oldest frame is discarded to make room for the newest one.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::video::frame::ReassembledFrame;

/// Drop-oldest queue of reassembled frames
pub struct FrameQueue {
    tx: Sender<ReassembledFrame>,
    rx: Receiver<ReassembledFrame>,
    capacity: usize,
    dropped_count: AtomicU64,
}

impl FrameQueue {
    /// Create a new queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Push a frame, evicting the oldest queued frame if full.
    /// Returns false if a frame had to be dropped.
    pub fn push(&self, frame: ReassembledFrame) -> bool {
        let mut frame = frame;
        let mut dropped_any = false;

        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return !dropped_any,
                Err(TrySendError::Full(rejected)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped_count.fetch_add(1, Ordering::Relaxed);
                        dropped_any = true;
                    }
                    frame = rejected;
                }
                // Both halves live in self
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Pop the oldest frame, waiting up to `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ReassembledFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<ReassembledFrame> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded because the consumer fell behind
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue
pub fn create_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}
