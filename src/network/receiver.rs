//! Receiver-side datagram loop
//!
//! A dedicated thread reads datagrams, decodes chunk headers, feeds the
//! reassembler and hands completed frames to a drop-oldest queue. The
//! socket's read timeout doubles as the eviction tick, so stale frames are
//! discarded even when no traffic arrives.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::codec::{Reassembler, ReassemblyStats};
use crate::config::{NetworkConfig, ReassemblyConfig};
use crate::error::NetworkError;
use crate::network::udp::{create_socket, UdpSocket};
use crate::protocol::{Packet, MAX_DATAGRAM_SIZE};
use crate::video::{create_shared_queue, ReassembledFrame, SharedFrameQueue};

/// Most recently completed frame, shared with the UI
pub type SharedLatestFrame = Arc<RwLock<Option<ReassembledFrame>>>;

/// Receive counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_packets: AtomicU64,
    pub receive_errors: AtomicU64,
    reassembly: Mutex<ReassemblyStats>,
}

/// Point-in-time copy of the receive and reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
    pub receive_errors: u64,
    pub reassembly: ReassemblyStats,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            reassembly: *self.reassembly.lock(),
        }
    }
}

/// Background UDP receiver producing reassembled frames
pub struct FrameReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<ReceiverStats>,
    frames: SharedFrameQueue,
    latest: SharedLatestFrame,
}

impl FrameReceiver {
    /// Bind the configured UDP port and start receiving
    pub fn bind(network: &NetworkConfig, reassembly: &ReassemblyConfig) -> crate::Result<Self> {
        let socket = create_socket(
            network.receive_addr()?,
            0,
            network.recv_buffer_size,
            Some(network.recv_timeout()),
        )?;
        Ok(Self::start(socket, reassembly)?)
    }

    /// Start receiving on an already bound socket.
    ///
    /// The socket needs a read timeout, otherwise [`stop`](Self::stop)
    /// blocks until the next datagram arrives.
    pub fn start(socket: UdpSocket, config: &ReassemblyConfig) -> Result<Self, NetworkError> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ReceiverStats::default());
        let frames = create_shared_queue(config.display_buffer);
        let latest: SharedLatestFrame = Arc::new(RwLock::new(None));
        let reassembler = Reassembler::new(config);

        let worker = ReceiveWorker {
            socket,
            reassembler,
            running: running.clone(),
            stats: stats.clone(),
            frames: frames.clone(),
            latest: latest.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("frame-receiver".to_string())
            .spawn(move || worker.run())
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        tracing::info!("Receiving frames on {}", local_addr);

        Ok(Self {
            local_addr,
            running,
            thread_handle: Some(thread_handle),
            stats,
            frames,
            latest,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue of completed frames for the consumer
    pub fn frames(&self) -> SharedFrameQueue {
        self.frames.clone()
    }

    pub fn latest_frame(&self) -> Option<ReassembledFrame> {
        self.latest.read().clone()
    }

    pub fn latest_handle(&self) -> SharedLatestFrame {
        self.latest.clone()
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the receive thread and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Receive thread panicked");
            }
        }
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReceiveWorker {
    socket: UdpSocket,
    reassembler: Reassembler,
    running: Arc<AtomicBool>,
    stats: Arc<ReceiverStats>,
    frames: SharedFrameQueue,
    latest: SharedLatestFrame,
}

impl ReceiveWorker {
    fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, source)) => {
                    self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                    self.handle_datagram(&buf[..len], source);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    let evicted = self.reassembler.evict_expired(Instant::now());
                    if evicted > 0 {
                        tracing::debug!("Discarded {} incomplete frames", evicted);
                    }
                }
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
                Err(e) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Receive failed: {}", e);
                }
            }

            *self.stats.reassembly.lock() = self.reassembler.stats();
        }

        tracing::info!("Frame receiver stopped");
    }

    fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr) {
        // The receive buffer has one spare byte so oversized datagrams show up here
        if datagram.len() > MAX_DATAGRAM_SIZE {
            self.stats.malformed_packets.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Dropping {} byte datagram from {}: exceeds {} bytes",
                datagram.len(),
                source,
                MAX_DATAGRAM_SIZE
            );
            return;
        }

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping datagram from {}: {}", source, e);
                return;
            }
        };

        if let Some(frame) = self.reassembler.on_packet(packet) {
            tracing::trace!("Frame {} complete ({} bytes)", frame.frame_id, frame.len());
            *self.latest.write() = Some(frame.clone());
            self.frames.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packetizer;
    use crate::network::udp::sender_socket;
    use bytes::Bytes;
    use std::time::Duration;

    fn start_receiver() -> FrameReceiver {
        let socket = create_socket(
            "127.0.0.1:0".parse().unwrap(),
            0,
            1 << 20,
            Some(Duration::from_millis(10)),
        )
        .unwrap();
        FrameReceiver::start(socket, &ReassemblyConfig::default()).unwrap()
    }

    #[test]
    fn test_receives_reordered_frame() {
        let mut receiver = start_receiver();
        let destination = receiver.local_addr();
        let sender = sender_socket(destination, 0).unwrap();

        let payload = Bytes::from((0..5000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
        let mut packets = Packetizer::new(1024).unwrap().packetize(9, &payload).unwrap();
        packets.reverse();
        for packet in &packets {
            sender.send_to(&packet.encode(), destination).unwrap();
        }

        let frame = receiver
            .frames()
            .pop_timeout(Duration::from_secs(2))
            .expect("frame should complete");
        assert_eq!(frame.frame_id, 9);
        assert_eq!(frame.payload, payload);
        assert_eq!(receiver.latest_frame().map(|f| f.frame_id), Some(9));

        receiver.stop();
        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 5);
        assert_eq!(stats.reassembly.frames_completed, 1);
    }

    #[test]
    fn test_malformed_datagrams_counted() {
        let mut receiver = start_receiver();
        let destination = receiver.local_addr();
        let sender = sender_socket(destination, 0).unwrap();

        sender.send_to(&[1, 2, 3], destination).unwrap();
        // chunk_count 0
        sender.send_to(&[0, 0, 0, 1, 0, 0, 0, 0, 0xFF], destination).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while receiver.stats().malformed_packets < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        receiver.stop();
        assert_eq!(receiver.stats().malformed_packets, 2);
        assert!(receiver.frames().is_empty());
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_oversized_datagram_dropped() {
        let socket = create_socket("127.0.0.1:0".parse().unwrap(), 0, 0, None).unwrap();
        let config = ReassemblyConfig::default();
        let stats = Arc::new(ReceiverStats::default());
        let frames = create_shared_queue(config.display_buffer);
        let mut worker = ReceiveWorker {
            socket,
            reassembler: Reassembler::new(&config),
            running: Arc::new(AtomicBool::new(true)),
            stats: stats.clone(),
            frames: frames.clone(),
            latest: Arc::new(RwLock::new(None)),
        };
        let source: SocketAddr = "127.0.0.1:9".parse().unwrap();

        // Single-chunk frame header followed by one byte too many
        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        datagram[..8].copy_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1]);
        worker.handle_datagram(&datagram, source);

        assert_eq!(stats.snapshot().malformed_packets, 1);
        assert_eq!(worker.reassembler.stats().frames_completed, 0);
        assert!(frames.is_empty());

        // The same frame at the size limit is accepted
        worker.handle_datagram(&datagram[..MAX_DATAGRAM_SIZE], source);
        assert_eq!(stats.snapshot().malformed_packets, 1);
        assert_eq!(frames.len(), 1);
    }
}
