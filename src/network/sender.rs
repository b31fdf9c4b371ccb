//! Sender-side transport loop
//!
//! Runs on a dedicated thread: waits on the control gate, captures and
//! encodes one frame, splits it into chunks and sends them in index order.
//! A frame that has started sending is always sent completely, so `STOP`
//! takes effect at the next frame boundary.

use bytes::BytesMut;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::codec::Packetizer;
use crate::control::SharedControlGate;
use crate::error::{CaptureError, NetworkError};
use crate::network::udp::UdpSocket;
use crate::protocol::{CHUNK_HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::video::FrameSource;

/// Transport counters, updated by the loop and read from anywhere
#[derive(Debug, Default)]
pub struct SenderStats {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub encode_errors: AtomicU64,
    pub capture_errors: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub next_frame_id: AtomicU32,
}

/// Point-in-time copy of [`SenderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub encode_errors: u64,
    pub capture_errors: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub next_frame_id: u32,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            next_frame_id: self.next_frame_id.load(Ordering::Relaxed),
        }
    }
}

/// Result of one capture-packetize-send iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// All chunks handed to the socket (some sends may have failed)
    Sent { frame_id: u32, packets: usize },
    /// Nothing was captured; no frame id consumed
    CaptureFailed,
    /// The encoder rejected the frame; its frame id is consumed
    EncodeFailed { frame_id: u32 },
    /// The frame could not be packetized; its frame id is consumed
    Dropped { frame_id: u32 },
}

/// Gate-driven capture and send loop
pub struct TransportLoop {
    source: Box<dyn FrameSource>,
    packetizer: Packetizer,
    socket: UdpSocket,
    destination: SocketAddr,
    gate: SharedControlGate,
    capture_backoff: Duration,
    next_frame_id: u32,
    stats: Arc<SenderStats>,
    datagram: BytesMut,
}

impl TransportLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        packetizer: Packetizer,
        socket: UdpSocket,
        destination: SocketAddr,
        gate: SharedControlGate,
        capture_backoff: Duration,
    ) -> Self {
        let datagram_capacity = (packetizer.max_chunk_payload() + CHUNK_HEADER_SIZE).min(MAX_DATAGRAM_SIZE);
        Self {
            source,
            packetizer,
            socket,
            destination,
            gate,
            capture_backoff,
            next_frame_id: 0,
            stats: Arc::new(SenderStats::default()),
            datagram: BytesMut::with_capacity(datagram_capacity),
        }
    }

    /// Shared counters for status reporting
    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    /// Frame id the next attempted frame will get
    pub fn next_frame_id(&self) -> u32 {
        self.next_frame_id
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    fn take_frame_id(&mut self) -> u32 {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        self.stats.next_frame_id.store(self.next_frame_id, Ordering::Relaxed);
        frame_id
    }

    /// Capture, packetize and send a single frame.
    ///
    /// Does not consult the gate. Every attempted frame (anything that made
    /// it past the grab) consumes exactly one frame id.
    pub fn step(&mut self) -> StepOutcome {
        let frame = match self.source.capture_and_encode() {
            Ok(frame) => frame,
            Err(CaptureError::Encode(e)) => {
                let frame_id = self.take_frame_id();
                self.stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Frame {}: {}", frame_id, e);
                return StepOutcome::EncodeFailed { frame_id };
            }
            Err(e) => {
                self.stats.capture_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Capture failed: {}", e);
                return StepOutcome::CaptureFailed;
            }
        };

        let frame_id = self.take_frame_id();
        let packets = match self.packetizer.packetize(frame_id, &frame.payload) {
            Ok(packets) => packets,
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Frame {} dropped: {}", frame_id, e);
                return StepOutcome::Dropped { frame_id };
            }
        };

        let mut failed = 0usize;
        for packet in &packets {
            self.datagram.clear();
            packet.encode_into(&mut self.datagram);

            match self.socket.send_to(&self.datagram, self.destination) {
                Ok(sent) => {
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    if failed == 0 {
                        tracing::warn!(
                            "Frame {} chunk {}: send failed: {}",
                            frame_id,
                            packet.chunk_index,
                            e
                        );
                    }
                    failed += 1;
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if failed > 0 {
            tracing::debug!("Frame {}: {} of {} chunks not sent", frame_id, failed, packets.len());
        }
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            "Frame {}: {} bytes in {} chunks",
            frame_id,
            frame.len(),
            packets.len()
        );

        StepOutcome::Sent {
            frame_id,
            packets: packets.len(),
        }
    }

    /// Loop until the gate is closed
    pub fn run(mut self) {
        tracing::info!(
            "Transport loop ready: {} -> {}",
            self.source.describe(),
            self.destination
        );

        while self.gate.wait_for_streaming() {
            if self.step() == StepOutcome::CaptureFailed {
                thread::sleep(self.capture_backoff);
            }
        }

        tracing::info!(
            "Transport loop stopped after {} frames",
            self.stats.frames_sent.load(Ordering::Relaxed)
        );
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<TransportHandle, NetworkError> {
        let gate = self.gate.clone();
        let stats = self.stats.clone();

        let thread_handle = thread::Builder::new()
            .name("transport".to_string())
            .spawn(move || self.run())
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        Ok(TransportHandle {
            gate,
            stats,
            thread_handle: Some(thread_handle),
        })
    }
}

/// Owner of a running transport thread
pub struct TransportHandle {
    gate: SharedControlGate,
    stats: Arc<SenderStats>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn stats(&self) -> SenderStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Close the gate and wait for the in-flight frame to finish
    pub fn shutdown(&mut self) {
        self.gate.close();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Transport thread panicked");
            }
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
