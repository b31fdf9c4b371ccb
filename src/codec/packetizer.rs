//! Frame packetizer
//!
//! Splits one encoded frame into chunk packets no larger than the configured
//! payload size. Stateless across frames; sending is the caller's job.

use bytes::Bytes;

use crate::error::PacketizeError;
use crate::protocol::{Packet, MAX_CHUNK_COUNT, MAX_CHUNK_PAYLOAD_LIMIT};

/// Number of chunks needed for `payload_len` bytes
pub fn chunk_count_for(payload_len: usize, max_chunk_payload: usize) -> usize {
    payload_len.div_ceil(max_chunk_payload)
}

/// Splits frames into packets of at most `max_chunk_payload` bytes
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    max_chunk_payload: usize,
}

impl Packetizer {
    pub fn new(max_chunk_payload: usize) -> Result<Self, PacketizeError> {
        if max_chunk_payload == 0 || max_chunk_payload > MAX_CHUNK_PAYLOAD_LIMIT {
            return Err(PacketizeError::InvalidChunkSize(max_chunk_payload));
        }
        Ok(Self { max_chunk_payload })
    }

    pub fn max_chunk_payload(&self) -> usize {
        self.max_chunk_payload
    }

    /// Produce the ordered packet sequence for one frame.
    ///
    /// Chunks share the frame's buffer, nothing is copied. Fails without
    /// producing any packet when the payload is empty or would need more
    /// than 65535 chunks.
    pub fn packetize(&self, frame_id: u32, payload: &Bytes) -> Result<Vec<Packet>, PacketizeError> {
        if payload.is_empty() {
            return Err(PacketizeError::EmptyFrame);
        }

        let chunk_count = chunk_count_for(payload.len(), self.max_chunk_payload);
        if chunk_count > MAX_CHUNK_COUNT {
            return Err(PacketizeError::FrameTooLarge {
                payload_len: payload.len(),
                chunk_count,
            });
        }

        let packets = (0..chunk_count)
            .map(|index| {
                let start = index * self.max_chunk_payload;
                let end = (start + self.max_chunk_payload).min(payload.len());
                Packet {
                    frame_id,
                    chunk_index: index as u16,
                    chunk_count: chunk_count as u16,
                    payload: payload.slice(start..end),
                }
            })
            .collect();

        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 256) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_2500_bytes_into_1024_chunks() {
        let packetizer = Packetizer::new(1024).unwrap();
        let data = payload(2500);
        let packets = packetizer.packetize(42, &data).unwrap();

        assert_eq!(packets.len(), 3);
        let sizes: Vec<usize> = packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.frame_id, 42);
            assert_eq!(packet.chunk_index as usize, i);
            assert_eq!(packet.chunk_count, 3);
        }

        let joined: Vec<u8> = packets.iter().flat_map(|p| p.payload.to_vec()).collect();
        assert_eq!(joined, data.to_vec());
    }

    #[test]
    fn test_exact_multiple_and_single_chunk() {
        let packetizer = Packetizer::new(100).unwrap();
        assert_eq!(packetizer.packetize(0, &payload(300)).unwrap().len(), 3);

        let single = packetizer.packetize(0, &payload(1)).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].chunk_count, 1);
    }

    #[test]
    fn test_empty_frame_rejected() {
        let packetizer = Packetizer::new(1024).unwrap();
        assert_eq!(
            packetizer.packetize(0, &Bytes::new()),
            Err(PacketizeError::EmptyFrame)
        );
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let packetizer = Packetizer::new(1).unwrap();
        let result = packetizer.packetize(0, &payload(70_000));
        assert_eq!(
            result,
            Err(PacketizeError::FrameTooLarge {
                payload_len: 70_000,
                chunk_count: 70_000,
            })
        );

        // 65535 chunks is still representable
        assert_eq!(packetizer.packetize(0, &payload(65_535)).unwrap().len(), 65_535);
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(Packetizer::new(0).is_err());
        assert!(Packetizer::new(MAX_CHUNK_PAYLOAD_LIMIT + 1).is_err());
        assert!(Packetizer::new(MAX_CHUNK_PAYLOAD_LIMIT).is_ok());
    }

    #[test]
    fn test_packets_fit_in_datagram() {
        let packetizer = Packetizer::new(MAX_CHUNK_PAYLOAD_LIMIT).unwrap();
        let packets = packetizer.packetize(1, &payload(200_000)).unwrap();
        assert!(packets
            .iter()
            .all(|p| p.wire_len() <= crate::protocol::MAX_DATAGRAM_SIZE));
    }
}
