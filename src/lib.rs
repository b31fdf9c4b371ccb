//! # LAN Camera Streamer
//!
//! Low-latency camera frame streaming over UDP, remotely started and
//! stopped over a TCP control channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             SENDER (camera)                           │
//! │                                                                       │
//! │   Controller ──TCP──► ┌────────────────┐   START / STOP / STATUS      │
//! │                       │ Control Server │──────────────┐               │
//! │                       │ (control)      │              ▼               │
//! │                       └────────────────┘      ┌──────────────┐        │
//! │                                               │ Control Gate │        │
//! │                                               └──────┬───────┘        │
//! │                                                      │ wait           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────▼──────────┐    │
//! │  │ Frame Source │──►│  Packetizer  │──►│ Transport Loop         │    │
//! │  │ (video)      │   │  (codec)     │   │ (network::sender)      │    │
//! │  └──────────────┘   └──────────────┘   └─────────────┬──────────┘    │
//! │                     [frame_id|chunk_index|chunk_count|payload]        │
//! └──────────────────────────────────────────────────────┼────────────────┘
//!                                                        │ UDP
//!                                                        ▼
//! ┌──────────────────────────────────────────────────────┼────────────────┐
//! │                            RECEIVER (viewer)         │                │
//! │                                       ┌──────────────▼──────────┐     │
//! │                                       │ Frame Receiver          │     │
//! │                                       │ (network::receiver)     │     │
//! │                                       └──────────────┬──────────┘     │
//! │                                       ┌──────────────▼──────────┐     │
//! │                                       │ Reassembler (codec)     │     │
//! │                                       │ timeout + capacity evict│     │
//! │                                       └──────────────┬──────────┘     │
//! │                                       ┌──────────────▼──────────┐     │
//! │                                       │ Frame Queue (video)     │     │
//! │                                       │ drop-oldest display buf │     │
//! │                                       └─────────────────────────┘     │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod protocol;
pub mod ui;
pub mod video;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default UDP port for video chunks
    pub const DEFAULT_VIDEO_PORT: u16 = 5001;

    /// Default TCP port for the control channel
    pub const DEFAULT_CONTROL_PORT: u16 = 5000;

    /// Default HTTP port for the status UI
    pub const DEFAULT_UI_PORT: u16 = 8080;

    /// Default payload bytes per chunk
    pub const DEFAULT_MAX_CHUNK_PAYLOAD: usize = 1024;

    /// Default socket send buffer size
    pub const DEFAULT_SEND_BUFFER_SIZE: usize = 1024 * 1024;

    /// Default socket receive buffer size
    pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65_536 * 10;

    /// Receive poll interval, bounds how late timeout eviction runs
    pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 20;

    /// Default capture resolution
    pub const DEFAULT_WIDTH: u32 = 640;
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Default JPEG quality (0-100)
    pub const DEFAULT_JPEG_QUALITY: u8 = 50;

    /// Default capture rate, 0 means as fast as the source allows
    pub const DEFAULT_FPS: u32 = 30;

    /// Pause after a failed frame grab
    pub const DEFAULT_CAPTURE_BACKOFF_MS: u64 = 500;

    /// Incomplete frames older than this are discarded
    pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 500;

    /// Maximum frames under reassembly at once
    pub const DEFAULT_MAX_PENDING_FRAMES: usize = 8;

    /// Maximum bytes buffered for a single frame
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

    /// Completed frame ids remembered to reject late duplicates
    pub const DEFAULT_COMPLETED_HISTORY: usize = 32;

    /// Completed frames held for display
    pub const DEFAULT_DISPLAY_BUFFER: usize = 3;

    /// Longest accepted control command line
    pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;
}
