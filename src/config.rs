//! Application configuration
//!
//! Loaded from a TOML file (explicit path, or the per-user config directory
//! when present) and then overridden from the command line by each binary.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::MAX_CHUNK_PAYLOAD_LIMIT;

/// Top-level configuration shared by sender and receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub capture: CaptureConfig,
    pub reassembly: ReassemblyConfig,
    pub control: ControlConfig,
    pub ui: UiConfig,
}

/// Data channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Receiver address the sender streams to (host:port)
    pub destination: String,
    /// Local interface for the receiver's UDP socket
    pub bind_address: String,
    /// UDP port the receiver listens on
    pub video_port: u16,
    /// Bytes of frame payload per datagram
    pub max_chunk_payload: usize,
    /// OS send buffer size in bytes
    pub send_buffer_size: usize,
    /// OS receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Receive poll interval; also the eviction sweep period when idle
    pub recv_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            destination: format!("127.0.0.1:{}", DEFAULT_VIDEO_PORT),
            bind_address: "0.0.0.0".to_string(),
            video_port: DEFAULT_VIDEO_PORT,
            max_chunk_payload: DEFAULT_MAX_CHUNK_PAYLOAD,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    /// Resolve the destination, accepting host names as well as literal addresses.
    ///
    /// Names like `localhost` can resolve to both `::1` and `127.0.0.1`; the
    /// address family of `bind_address` wins (IPv4 unless it is an IPv6 literal).
    pub fn destination_addr(&self) -> Result<SocketAddr> {
        let resolved: Vec<SocketAddr> = self
            .destination
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Invalid destination {}: {}", self.destination, e)))?
            .collect();

        let prefer_v6 = matches!(self.bind_address.parse::<IpAddr>(), Ok(IpAddr::V6(_)));
        pick_address(&resolved, prefer_v6)
            .ok_or_else(|| Error::Config(format!("Destination {} did not resolve", self.destination)))
    }

    /// Address the receiver binds to
    pub fn receive_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind_address, self.video_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// Kind of frame source used by the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synthetic frames sized like JPEGs at the configured resolution and quality
    TestPattern,
    /// Pre-encoded JPEG files from `frames_dir`, played in a loop
    Files,
}

/// Capture/encode collaborator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Target frames per second
    pub fps: u32,
    pub frames_dir: Option<PathBuf>,
    /// Pause after a failed grab before retrying
    pub capture_backoff_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::TestPattern,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            fps: DEFAULT_FPS,
            frames_dir: None,
            capture_backoff_ms: DEFAULT_CAPTURE_BACKOFF_MS,
        }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }
}

/// Receiver-side reassembly settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Incomplete frames older than this are discarded
    pub frame_timeout_ms: u64,
    /// Hard cap on concurrently tracked frame ids
    pub max_pending_frames: usize,
    /// Hard cap on bytes buffered for a single frame
    pub max_frame_bytes: usize,
    /// Completed frame ids remembered to reject late duplicates
    pub completed_history: usize,
    /// Completed frames queued for the consumer
    pub display_buffer: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            completed_history: DEFAULT_COMPLETED_HISTORY,
            display_buffer: DEFAULT_DISPLAY_BUFFER,
        }
    }
}

impl ReassemblyConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// Control channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_address: String,
    pub port: u16,
    /// Longest accepted command line
    pub max_line_length: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_CONTROL_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ControlConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind_address, self.port)
    }
}

/// Status web UI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_UI_PORT,
        }
    }
}

impl UiConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind_address, self.http_port)
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid address {}:{}: {}", host, port, e)))
}

impl AppConfig {
    /// Per-user config file location, e.g. `~/.config/lan-camera-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-camera-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from `path` if given, else from the default location if it exists,
    /// else fall back to built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the transport cannot operate with
    pub fn validate(&self) -> Result<()> {
        let chunk = self.network.max_chunk_payload;
        if chunk == 0 || chunk > MAX_CHUNK_PAYLOAD_LIMIT {
            return Err(Error::Config(format!(
                "max_chunk_payload must be in 1..={}, got {}",
                MAX_CHUNK_PAYLOAD_LIMIT, chunk
            )));
        }
        if self.network.recv_timeout_ms == 0 {
            return Err(Error::Config("recv_timeout_ms must be positive".into()));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.capture.jpeg_quality
            )));
        }
        if self.capture.fps == 0 {
            return Err(Error::Config("fps must be positive".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::Config("resolution must be non-zero".into()));
        }
        if self.capture.source == SourceKind::Files && self.capture.frames_dir.is_none() {
            return Err(Error::Config("frames_dir is required for the files source".into()));
        }
        if self.reassembly.frame_timeout_ms == 0 {
            return Err(Error::Config("frame_timeout_ms must be positive".into()));
        }
        if self.reassembly.max_pending_frames == 0 {
            return Err(Error::Config("max_pending_frames must be positive".into()));
        }
        if self.reassembly.max_frame_bytes == 0 {
            return Err(Error::Config("max_frame_bytes must be positive".into()));
        }
        if self.control.max_line_length == 0 {
            return Err(Error::Config("max_line_length must be positive".into()));
        }
        Ok(())
    }
}

/// Parse a `WIDTHxHEIGHT` resolution string
pub fn parse_resolution(text: &str) -> Result<(u32, u32)> {
    let (width, height) = text
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| Error::Config(format!("Invalid resolution: {}", text)))?;
    let width = width
        .parse()
        .map_err(|_| Error::Config(format!("Invalid resolution width: {}", text)))?;
    let height = height
        .parse()
        .map_err(|_| Error::Config(format!("Invalid resolution height: {}", text)))?;
    Ok((width, height))
}

/// First address of the preferred family, else the first address
fn pick_address(addrs: &[SocketAddr], prefer_v6: bool) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv6() == prefer_v6)
        .or_else(|| addrs.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.control.port, 5000);
        assert_eq!(config.network.video_port, 5001);
        assert_eq!(config.network.max_chunk_payload, 1024);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, 480);
        assert_eq!(config.reassembly.frame_timeout(), Duration::from_millis(500));
        assert_eq!(config.reassembly.max_pending_frames, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [network]
            destination = "100.93.237.108:6001"
            max_chunk_payload = 1400

            [capture]
            jpeg_quality = 70
            "#,
        )
        .unwrap();

        assert_eq!(config.network.destination, "100.93.237.108:6001");
        assert_eq!(config.network.max_chunk_payload, 1400);
        assert_eq!(config.network.video_port, DEFAULT_VIDEO_PORT);
        assert_eq!(config.capture.jpeg_quality, 70);
        assert_eq!(config.capture.fps, DEFAULT_FPS);
        assert_eq!(
            config.network.destination_addr().unwrap(),
            "100.93.237.108:6001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.network.max_chunk_payload = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.network.max_chunk_payload = MAX_CHUNK_PAYLOAD_LIMIT + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.source = SourceKind::Files;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reassembly.max_pending_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.capture.source = SourceKind::Files;
        config.capture.frames_dir = Some(PathBuf::from("/srv/frames"));
        config.ui.enabled = false;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
        assert_eq!(AppConfig::load_or_default(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_destination_prefers_bind_family() {
        let v6: SocketAddr = "[::1]:5001".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:5001".parse().unwrap();

        assert_eq!(pick_address(&[v6, v4], false), Some(v4));
        assert_eq!(pick_address(&[v6, v4], true), Some(v6));
        assert_eq!(pick_address(&[v6], false), Some(v6));
        assert_eq!(pick_address(&[], false), None);

        let mut config = NetworkConfig::default();
        config.destination = "localhost:5001".to_string();
        let addr = config.destination_addr().unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 5001);
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("640x480").unwrap(), (640, 480));
        assert_eq!(parse_resolution("1280X720").unwrap(), (1280, 720));
        assert!(parse_resolution("640").is_err());
        assert!(parse_resolution("ax480").is_err());
    }
}
