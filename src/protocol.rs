//! Wire protocol definitions
//!
//! Two independent channels share this module:
//!
//! - **Data channel (UDP)**: each datagram carries one chunk of an encoded
//!   frame, prefixed by a fixed 8-byte header in network byte order:
//!
//!   ```text
//!   0                   4         6         8
//!   +-------------------+---------+---------+------------------------+
//!   |     frame_id      |  index  |  count  |  chunk payload ...     |
//!   +-------------------+---------+---------+------------------------+
//!   ```
//!
//!   The payload length is implied by the datagram length.
//!
//! - **Control channel (TCP)**: newline-terminated ASCII commands
//!   (`START`, `STOP`, `STATUS`), answered by newline-terminated status lines.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ControlError, PacketError};

/// Size of the chunk header in bytes
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest chunk payload that still fits a single datagram
pub const MAX_CHUNK_PAYLOAD_LIMIT: usize = MAX_DATAGRAM_SIZE - CHUNK_HEADER_SIZE;

/// Largest number of chunks a frame may be split into
pub const MAX_CHUNK_COUNT: usize = u16::MAX as usize;

/// One datagram of the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame this chunk belongs to
    pub frame_id: u32,
    /// Zero-based position of the chunk within the frame
    pub chunk_index: u16,
    /// Total chunks of the frame, always >= 1
    pub chunk_count: u16,
    /// Chunk bytes
    pub payload: Bytes,
}

impl Packet {
    /// Encoded size of this packet on the wire
    pub fn wire_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len()
    }

    /// Append header and payload to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        buf.put_u32(self.frame_id);
        buf.put_u16(self.chunk_index);
        buf.put_u16(self.chunk_count);
        buf.put_slice(&self.payload);
    }

    /// Encode into a standalone datagram
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a received datagram, copying the payload out of `datagram`
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < CHUNK_HEADER_SIZE {
            return Err(PacketError::Truncated(datagram.len()));
        }

        let mut header = &datagram[..CHUNK_HEADER_SIZE];
        let frame_id = header.get_u32();
        let chunk_index = header.get_u16();
        let chunk_count = header.get_u16();

        if chunk_count == 0 {
            return Err(PacketError::ZeroChunkCount);
        }
        if chunk_index >= chunk_count {
            return Err(PacketError::IndexOutOfRange {
                index: chunk_index,
                count: chunk_count,
            });
        }

        Ok(Self {
            frame_id,
            chunk_index,
            chunk_count,
            payload: Bytes::copy_from_slice(&datagram[CHUNK_HEADER_SIZE..]),
        })
    }
}

/// Streaming state held by the control gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Streaming,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "IDLE",
            StreamState::Streaming => "STREAMING",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command received on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Status,
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let command = line.trim();
        if command.eq_ignore_ascii_case("START") {
            Ok(ControlCommand::Start)
        } else if command.eq_ignore_ascii_case("STOP") {
            Ok(ControlCommand::Stop)
        } else if command.eq_ignore_ascii_case("STATUS") {
            Ok(ControlCommand::Status)
        } else {
            Err(ControlError::UnknownCommand(command.to_string()))
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlCommand::Start => "START",
            ControlCommand::Stop => "STOP",
            ControlCommand::Status => "STATUS",
        })
    }
}

/// Status line sent back on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Started,
    Stopped,
    Status(StreamState),
    UnknownCommand,
}

impl ControlReply {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ControlReply::UnknownCommand)
    }

    /// Parse a reply line as sent by the control server
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "OK: STREAMING STARTED" => Some(ControlReply::Started),
            "OK: STREAMING STOPPED" => Some(ControlReply::Stopped),
            "OK: STATUS STREAMING" => Some(ControlReply::Status(StreamState::Streaming)),
            "OK: STATUS IDLE" => Some(ControlReply::Status(StreamState::Idle)),
            "ERR: UNKNOWN COMMAND" => Some(ControlReply::UnknownCommand),
            _ => None,
        }
    }
}

impl fmt::Display for ControlReply {
    /// Reply text without the line terminator
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlReply::Started => f.write_str("OK: STREAMING STARTED"),
            ControlReply::Stopped => f.write_str("OK: STREAMING STOPPED"),
            ControlReply::Status(state) => write!(f, "OK: STATUS {}", state),
            ControlReply::UnknownCommand => f.write_str("ERR: UNKNOWN COMMAND"),
        }
    }
}
