//! Error types for the camera streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Packetize error: {0}")]
    Packetize(#[from] PacketizeError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture collaborator errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Frame grab failed: {0}")]
    GrabFailed(String),

    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Encoder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Encoder rejected frame: {0}")]
    Rejected(String),

    #[error("Encoder produced no output")]
    EmptyOutput,
}

/// Packetizer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketizeError {
    #[error("Frame payload is empty")]
    EmptyFrame,

    #[error("Frame too large: {payload_len} bytes needs {chunk_count} chunks")]
    FrameTooLarge { payload_len: usize, chunk_count: usize },

    #[error("Invalid chunk payload size: {0}")]
    InvalidChunkSize(usize),
}

/// Malformed datagram errors, dropped at the receive boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet truncated: {0} bytes")]
    Truncated(usize),

    #[error("Chunk count is zero")]
    ZeroChunkCount,

    #[error("Chunk index {index} out of range for {count} chunks")]
    IndexOutOfRange { index: u16, count: u16 },
}

/// Control channel errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
