//! Frame reassembler
//!
//! Rebuilds frames from chunk packets that may arrive in any order, more than
//! once, or not at all. Each in-progress frame gets a buffer keyed by
//! `frame_id`; a frame is emitted exactly once, when its last missing chunk
//! arrives.
//!
//! Two eviction rules bound the table:
//!
//! - **Timeout**: a buffer older than `frame_timeout` is discarded without
//!   emitting. This is the primary bound since a frame that lost a chunk can
//!   never complete.
//! - **Capacity**: at most `max_pending_frames` ids are tracked. When full, a
//!   packet for an id newer than every buffered id evicts the oldest buffer;
//!   a packet for any other unknown id is dropped.
//!
//! Frame ids are compared with wrapping serial arithmetic so the sender's
//! `u32` counter may roll over.
//!
//! Finished ids (completed, timed out, superseded or oversized) are kept in a
//! bounded history. Packets arriving for them later are dropped instead of
//! opening a buffer that could never complete.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ReassemblyConfig;
use crate::protocol::Packet;
use crate::video::frame::ReassembledFrame;

/// True if `a` comes after `b` in wrapping `u32` order
pub fn is_newer(a: u32, b: u32) -> bool {
    a != b && (a.wrapping_sub(b) as i32) > 0
}

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblyStats {
    pub frames_completed: u64,
    /// Incomplete frames dropped after `frame_timeout`
    pub frames_timed_out: u64,
    /// Incomplete frames pushed out by a newer id at capacity
    pub frames_superseded: u64,
    /// Frames discarded for exceeding `max_frame_bytes`
    pub frames_oversized: u64,
    pub chunk_count_mismatches: u64,
    pub duplicate_chunks: u64,
    /// Duplicates whose bytes differ from the stored chunk
    pub corrupt_duplicates: u64,
    /// Packets for a frame that already completed
    pub late_packets: u64,
    /// Packets for a frame that was already discarded incomplete
    pub abandoned_packets: u64,
    /// Packets for an older unknown id while at capacity
    pub stale_packets: u64,
    pub invalid_packets: u64,
    pub pending_frames: usize,
}

/// How a frame id left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retired {
    Completed,
    Abandoned,
}

enum ChunkInsert {
    New,
    Duplicate,
    CorruptDuplicate,
}

/// Chunks received so far for one frame
#[derive(Debug)]
struct ReassemblyBuffer {
    chunk_count: u16,
    chunks: HashMap<u16, Bytes>,
    bytes_buffered: usize,
    first_seen_at: Instant,
}

impl ReassemblyBuffer {
    fn new(chunk_count: u16, now: Instant) -> Self {
        Self {
            chunk_count,
            chunks: HashMap::new(),
            bytes_buffered: 0,
            first_seen_at: now,
        }
    }

    /// Buffered size after storing `payload_len` bytes at `index`
    fn size_with(&self, index: u16, payload_len: usize) -> usize {
        let replaced = self.chunks.get(&index).map_or(0, |c| c.len());
        self.bytes_buffered - replaced + payload_len
    }

    fn insert(&mut self, index: u16, payload: Bytes) -> ChunkInsert {
        self.bytes_buffered = self.size_with(index, payload.len());
        let outcome = match self.chunks.get(&index) {
            None => ChunkInsert::New,
            Some(existing) if *existing == payload => ChunkInsert::Duplicate,
            Some(_) => ChunkInsert::CorruptDuplicate,
        };
        self.chunks.insert(index, payload);
        outcome
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.chunk_count as usize
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.first_seen_at) > timeout
    }

    /// Concatenate chunks in index order. Only valid once complete.
    fn assemble(self) -> Bytes {
        let mut chunks: Vec<(u16, Bytes)> = self.chunks.into_iter().collect();
        if chunks.len() == 1 {
            return chunks.swap_remove(0).1;
        }

        chunks.sort_unstable_by_key(|(index, _)| *index);
        let mut frame = BytesMut::with_capacity(self.bytes_buffered);
        for (_, chunk) in chunks {
            frame.extend_from_slice(&chunk);
        }
        frame.freeze()
    }
}

/// Bounded table of in-progress frames
pub struct Reassembler {
    frame_timeout: Duration,
    max_pending_frames: usize,
    max_frame_bytes: usize,
    history_len: usize,
    buffers: HashMap<u32, ReassemblyBuffer>,
    /// Recently finished ids, oldest first
    retired: VecDeque<u32>,
    retired_lookup: HashMap<u32, Retired>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(config: &ReassemblyConfig) -> Self {
        Self {
            frame_timeout: config.frame_timeout(),
            max_pending_frames: config.max_pending_frames.max(1),
            max_frame_bytes: config.max_frame_bytes,
            history_len: config.completed_history,
            buffers: HashMap::with_capacity(config.max_pending_frames),
            retired: VecDeque::with_capacity(config.completed_history),
            retired_lookup: HashMap::with_capacity(config.completed_history),
            stats: ReassemblyStats::default(),
        }
    }

    /// Feed one packet, returning the frame it completes if any
    pub fn on_packet(&mut self, packet: Packet) -> Option<ReassembledFrame> {
        self.on_packet_at(packet, Instant::now())
    }

    /// [`on_packet`](Self::on_packet) with an explicit clock reading
    pub fn on_packet_at(&mut self, packet: Packet, now: Instant) -> Option<ReassembledFrame> {
        self.evict_expired(now);

        let frame_id = packet.frame_id;
        if packet.chunk_count == 0 || packet.chunk_index >= packet.chunk_count {
            self.stats.invalid_packets += 1;
            debug!(
                "Frame {}: invalid chunk {}/{}, dropping",
                frame_id, packet.chunk_index, packet.chunk_count
            );
            return None;
        }

        match self.retired_lookup.get(&frame_id) {
            Some(Retired::Completed) => {
                self.stats.late_packets += 1;
                debug!("Frame {} already completed, dropping late chunk", frame_id);
                return None;
            }
            Some(Retired::Abandoned) => {
                self.stats.abandoned_packets += 1;
                debug!("Frame {} already discarded, dropping late chunk", frame_id);
                return None;
            }
            None => {}
        }

        if !self.buffers.contains_key(&frame_id) {
            if !self.make_room_for(frame_id) {
                self.stats.stale_packets += 1;
                debug!("Frame {} is older than all pending frames at capacity, dropping", frame_id);
                return None;
            }
            self.buffers
                .insert(frame_id, ReassemblyBuffer::new(packet.chunk_count, now));
        }

        let buffer = self.buffers.get_mut(&frame_id)?;

        if packet.chunk_count != buffer.chunk_count {
            self.stats.chunk_count_mismatches += 1;
            warn!(
                "Frame {}: chunk count {} disagrees with {}, dropping chunk",
                frame_id, packet.chunk_count, buffer.chunk_count
            );
            return None;
        }

        if buffer.size_with(packet.chunk_index, packet.payload.len()) > self.max_frame_bytes {
            self.buffers.remove(&frame_id);
            self.retire(frame_id, Retired::Abandoned);
            self.stats.frames_oversized += 1;
            warn!(
                "Frame {} exceeds {} bytes, discarding",
                frame_id, self.max_frame_bytes
            );
            return None;
        }

        match buffer.insert(packet.chunk_index, packet.payload) {
            ChunkInsert::New => {}
            ChunkInsert::Duplicate => {
                self.stats.duplicate_chunks += 1;
            }
            ChunkInsert::CorruptDuplicate => {
                self.stats.duplicate_chunks += 1;
                self.stats.corrupt_duplicates += 1;
                warn!(
                    "Frame {}: chunk {} received twice with different bytes",
                    frame_id, packet.chunk_index
                );
            }
        }

        if !buffer.is_complete() {
            return None;
        }

        let buffer = self.buffers.remove(&frame_id)?;
        let assembly_time = now.saturating_duration_since(buffer.first_seen_at);
        self.retire(frame_id, Retired::Completed);
        self.stats.frames_completed += 1;

        Some(ReassembledFrame {
            frame_id,
            payload: buffer.assemble(),
            assembly_time,
        })
    }

    /// Drop incomplete frames older than the timeout. Returns how many were dropped.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let timeout = self.frame_timeout;
        let expired: Vec<u32> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.is_expired(now, timeout))
            .map(|(&frame_id, _)| frame_id)
            .collect();

        for &frame_id in &expired {
            if let Some(buffer) = self.buffers.remove(&frame_id) {
                debug!(
                    "Frame {} timed out with {}/{} chunks",
                    frame_id,
                    buffer.chunks.len(),
                    buffer.chunk_count
                );
                self.retire(frame_id, Retired::Abandoned);
            }
        }

        self.stats.frames_timed_out += expired.len() as u64;
        expired.len()
    }

    /// Ensure a slot exists for a new `frame_id`
    fn make_room_for(&mut self, frame_id: u32) -> bool {
        while self.buffers.len() >= self.max_pending_frames {
            if !self.buffers.keys().all(|&pending| is_newer(frame_id, pending)) {
                return false;
            }

            let oldest = self
                .buffers
                .keys()
                .copied()
                .max_by_key(|&pending| frame_id.wrapping_sub(pending));

            match oldest {
                Some(oldest) => {
                    self.buffers.remove(&oldest);
                    self.retire(oldest, Retired::Abandoned);
                    self.stats.frames_superseded += 1;
                    debug!("Frame {} superseded by frame {}", oldest, frame_id);
                }
                None => break,
            }
        }
        true
    }

    fn retire(&mut self, frame_id: u32, how: Retired) {
        if self.history_len == 0 {
            return;
        }
        if self.retired_lookup.insert(frame_id, how).is_none() {
            self.retired.push_back(frame_id);
        }
        while self.retired.len() > self.history_len {
            if let Some(forgotten) = self.retired.pop_front() {
                self.retired_lookup.remove(&forgotten);
            }
        }
    }

    /// Number of frames currently in progress
    pub fn pending_frames(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_pending(&self, frame_id: u32) -> bool {
        self.buffers.contains_key(&frame_id)
    }

    /// Bytes held by all in-progress frames
    pub fn buffered_bytes(&self) -> usize {
        self.buffers.values().map(|b| b.bytes_buffered).sum()
    }

    pub fn stats(&self) -> ReassemblyStats {
        ReassemblyStats {
            pending_frames: self.buffers.len(),
            ..self.stats
        }
    }

    /// Drop all in-progress frames and history
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.retired.clear();
        self.retired_lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::packetizer::Packetizer;

    fn config() -> ReassemblyConfig {
        ReassemblyConfig {
            frame_timeout_ms: 500,
            max_pending_frames: 8,
            max_frame_bytes: 1 << 20,
            completed_history: 32,
            display_buffer: 3,
        }
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>())
    }

    fn packets(frame_id: u32, len: usize, chunk: usize) -> Vec<Packet> {
        Packetizer::new(chunk)
            .unwrap()
            .packetize(frame_id, &payload(len))
            .unwrap()
    }

    fn chunk(frame_id: u32, index: u16, count: u16, data: &'static [u8]) -> Packet {
        Packet {
            frame_id,
            chunk_index: index,
            chunk_count: count,
            payload: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut reassembler = Reassembler::new(&config());
        let mut parts = packets(5, 2500, 1024);
        assert_eq!(parts.len(), 3);

        let p1 = parts.pop().unwrap();
        let p0_1 = parts.pop().unwrap();
        let p0_0 = parts.pop().unwrap();

        assert!(reassembler.on_packet(p1).is_none());
        assert!(reassembler.on_packet(p0_0).is_none());
        let frame = reassembler.on_packet(p0_1).unwrap();

        assert_eq!(frame.frame_id, 5);
        assert_eq!(frame.payload.len(), 2500);
        assert_eq!(frame.payload, payload(2500));
        assert_eq!(reassembler.pending_frames(), 0);
        assert_eq!(reassembler.stats().frames_completed, 1);
    }

    #[test]
    fn test_every_permutation_of_three_chunks() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut reassembler = Reassembler::new(&config());
            let parts = packets(1, 2500, 1024);
            let mut emitted = Vec::new();
            for index in order {
                emitted.extend(reassembler.on_packet(parts[index].clone()));
            }
            assert_eq!(emitted.len(), 1, "order {:?}", order);
            assert_eq!(emitted[0].payload, payload(2500));
        }
    }

    #[test]
    fn test_duplicates_never_emit_twice() {
        let mut reassembler = Reassembler::new(&config());
        let parts = packets(9, 3000, 1000);

        assert!(reassembler.on_packet(parts[0].clone()).is_none());
        assert!(reassembler.on_packet(parts[0].clone()).is_none());
        assert!(reassembler.on_packet(parts[1].clone()).is_none());
        let frame = reassembler.on_packet(parts[2].clone()).unwrap();
        assert_eq!(frame.payload, payload(3000));

        // Late duplicates after completion
        for part in &parts {
            assert!(reassembler.on_packet(part.clone()).is_none());
        }
        assert_eq!(reassembler.pending_frames(), 0);

        let stats = reassembler.stats();
        assert_eq!(stats.frames_completed, 1);
        assert_eq!(stats.duplicate_chunks, 1);
        assert_eq!(stats.late_packets, 3);
    }

    #[test]
    fn test_single_chunk_duplicate_after_completion() {
        let mut reassembler = Reassembler::new(&config());
        let packet = chunk(3, 0, 1, b"tiny");
        assert!(reassembler.on_packet(packet.clone()).is_some());
        assert!(reassembler.on_packet(packet).is_none());
    }

    #[test]
    fn test_missing_chunk_never_completes() {
        let mut reassembler = Reassembler::new(&config());
        let parts = packets(2, 5000, 1000);

        for (i, part) in parts.iter().enumerate() {
            if i != 3 {
                assert!(reassembler.on_packet(part.clone()).is_none());
            }
        }
        assert!(reassembler.is_pending(2));

        let frame = reassembler.on_packet(parts[3].clone()).unwrap();
        assert_eq!(frame.payload, payload(5000));
    }

    #[test]
    fn test_timeout_eviction() {
        let mut reassembler = Reassembler::new(&config());
        let start = Instant::now();
        let parts = packets(4, 2048, 1024);

        assert!(reassembler.on_packet_at(parts[0].clone(), start).is_none());
        assert_eq!(reassembler.evict_expired(start + Duration::from_millis(500)), 0);
        assert_eq!(reassembler.evict_expired(start + Duration::from_millis(501)), 1);
        assert!(!reassembler.is_pending(4));
        assert_eq!(reassembler.stats().frames_timed_out, 1);

        // The missing chunk arriving later cannot revive the frame
        let later = start + Duration::from_millis(600);
        assert!(reassembler.on_packet_at(parts[1].clone(), later).is_none());
        assert!(!reassembler.is_pending(4));

        let stats = reassembler.stats();
        assert_eq!(stats.abandoned_packets, 1);
        assert_eq!(stats.frames_timed_out, 1);
        assert_eq!(stats.pending_frames, 0);
    }

    #[test]
    fn test_superseded_frame_stays_discarded() {
        let mut config = config();
        config.max_pending_frames = 1;
        let mut reassembler = Reassembler::new(&config);
        let now = Instant::now();

        reassembler.on_packet_at(chunk(1, 0, 2, b"a"), now);
        reassembler.on_packet_at(chunk(2, 0, 2, b"b"), now);
        assert_eq!(reassembler.stats().frames_superseded, 1);

        // Frame 1's remaining chunk does not displace frame 2
        assert!(reassembler.on_packet_at(chunk(1, 1, 2, b"a"), now).is_none());
        assert!(reassembler.is_pending(2));
        assert!(!reassembler.is_pending(1));
        assert_eq!(reassembler.stats().abandoned_packets, 1);
    }

    #[test]
    fn test_packet_arrival_triggers_expiry() {
        let mut reassembler = Reassembler::new(&config());
        let start = Instant::now();

        reassembler.on_packet_at(chunk(1, 0, 2, b"a"), start);
        reassembler.on_packet_at(chunk(2, 0, 2, b"b"), start + Duration::from_millis(1000));

        assert!(!reassembler.is_pending(1));
        assert!(reassembler.is_pending(2));
    }

    #[test]
    fn test_capacity_evicts_oldest_for_newer_id() {
        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();
        for id in 10..18 {
            reassembler.on_packet_at(chunk(id, 0, 2, b"x"), now);
        }
        assert_eq!(reassembler.pending_frames(), 8);

        reassembler.on_packet_at(chunk(18, 0, 2, b"x"), now);
        assert_eq!(reassembler.pending_frames(), 8);
        assert!(!reassembler.is_pending(10));
        assert!(reassembler.is_pending(18));
        assert_eq!(reassembler.stats().frames_superseded, 1);

        // An id older than everything pending is dropped at capacity
        reassembler.on_packet_at(chunk(5, 0, 2, b"x"), now);
        assert!(!reassembler.is_pending(5));
        assert_eq!(reassembler.stats().stale_packets, 1);

        // Frames already pending still complete at capacity
        assert!(reassembler.on_packet_at(chunk(12, 1, 2, b"y"), now).is_some());
        assert_eq!(reassembler.pending_frames(), 7);
    }

    #[test]
    fn test_flooding_is_bounded() {
        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();
        let mut id: u32 = 0;
        for i in 0..10_000u32 {
            id = id.wrapping_add(i.wrapping_mul(2_654_435_761) % 1000);
            reassembler.on_packet_at(chunk(id, 0, 65_535, b"flood"), now);
            assert!(reassembler.pending_frames() <= 8);
        }
    }

    #[test]
    fn test_wrapping_frame_ids() {
        assert!(is_newer(0, u32::MAX));
        assert!(is_newer(5, u32::MAX - 5));
        assert!(!is_newer(u32::MAX, 0));
        assert!(!is_newer(7, 7));

        let mut config = config();
        config.max_pending_frames = 2;
        let mut reassembler = Reassembler::new(&config);
        let now = Instant::now();

        reassembler.on_packet_at(chunk(u32::MAX - 1, 0, 2, b"a"), now);
        reassembler.on_packet_at(chunk(u32::MAX, 0, 2, b"b"), now);
        reassembler.on_packet_at(chunk(0, 0, 2, b"c"), now);

        assert!(!reassembler.is_pending(u32::MAX - 1));
        assert!(reassembler.is_pending(u32::MAX));
        assert!(reassembler.is_pending(0));
    }

    #[test]
    fn test_chunk_count_mismatch_rejected() {
        let mut reassembler = Reassembler::new(&config());
        assert!(reassembler.on_packet(chunk(7, 0, 2, b"aa")).is_none());
        assert!(reassembler.on_packet(chunk(7, 1, 3, b"bb")).is_none());
        assert_eq!(reassembler.stats().chunk_count_mismatches, 1);

        let frame = reassembler.on_packet(chunk(7, 1, 2, b"bb")).unwrap();
        assert_eq!(&frame.payload[..], b"aabb");
    }

    #[test]
    fn test_corrupt_duplicate_is_counted() {
        let mut reassembler = Reassembler::new(&config());
        reassembler.on_packet(chunk(1, 0, 2, b"aa"));
        reassembler.on_packet(chunk(1, 0, 2, b"zz"));

        let stats = reassembler.stats();
        assert_eq!(stats.duplicate_chunks, 1);
        assert_eq!(stats.corrupt_duplicates, 1);

        let frame = reassembler.on_packet(chunk(1, 1, 2, b"bb")).unwrap();
        assert_eq!(&frame.payload[..], b"zzbb");
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut config = config();
        config.max_frame_bytes = 5;
        let mut reassembler = Reassembler::new(&config);

        reassembler.on_packet(chunk(1, 0, 3, b"abc"));
        assert_eq!(reassembler.buffered_bytes(), 3);
        reassembler.on_packet(chunk(1, 1, 3, b"def"));

        assert!(!reassembler.is_pending(1));
        assert_eq!(reassembler.stats().frames_oversized, 1);
    }

    #[test]
    fn test_invalid_packet_dropped() {
        let mut reassembler = Reassembler::new(&config());
        assert!(reassembler.on_packet(chunk(1, 0, 0, b"a")).is_none());
        assert!(reassembler.on_packet(chunk(1, 4, 2, b"a")).is_none());
        assert_eq!(reassembler.pending_frames(), 0);
        assert_eq!(reassembler.stats().invalid_packets, 2);
    }

    #[test]
    fn test_completed_history_is_bounded() {
        let mut config = config();
        config.completed_history = 2;
        let mut reassembler = Reassembler::new(&config);

        for id in 0..3 {
            assert!(reassembler.on_packet(chunk(id, 0, 1, b"f")).is_some());
        }
        // Frame 0 fell out of the history, so a restarted sender is accepted again
        assert!(reassembler.on_packet(chunk(0, 0, 1, b"f")).is_some());
        assert!(reassembler.on_packet(chunk(2, 0, 1, b"f")).is_none());
    }
}
