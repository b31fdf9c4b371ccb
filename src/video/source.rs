//! Frame sources
//!
//! The transport only needs "give me the next encoded frame". Camera access
//! and JPEG encoding live behind [`FrameSource`]; the sources here cover
//! bring-up without a camera (synthetic frames) and replay of pre-encoded
//! JPEG files.

use bytes::{BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{CaptureConfig, SourceKind};
use crate::error::{CaptureError, EncodeError};
use crate::video::frame::EncodedFrame;

/// Capture/encode collaborator driven by the transport loop
pub trait FrameSource: Send {
    /// Block until the next frame is captured and encoded
    fn capture_and_encode(&mut self) -> Result<EncodedFrame, CaptureError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Build the source selected in the configuration
pub fn from_config(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::TestPattern => Ok(Box::new(TestPatternSource::new(
            config.width,
            config.height,
            config.jpeg_quality,
            config.fps,
        ))),
        SourceKind::Files => {
            let dir = config.frames_dir.as_deref().ok_or_else(|| {
                CaptureError::DeviceUnavailable("no frames directory configured".into())
            })?;
            Ok(Box::new(FileSequenceSource::open(dir, config.fps)?))
        }
    }
}

/// Paces a source to a fixed frame rate. An fps of 0 disables pacing.
#[derive(Debug)]
pub struct FramePacer {
    interval: Option<Duration>,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64)),
            next_deadline: None,
        }
    }

    /// Sleep until the next frame slot. Falls back to "now" when running late
    /// so a slow consumer does not cause a burst of catch-up frames.
    pub fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };

        let now = Instant::now();
        if let Some(deadline) = self.next_deadline {
            if deadline > now {
                std::thread::sleep(deadline - now);
                self.next_deadline = Some(deadline + interval);
                return;
            }
        }
        self.next_deadline = Some(now + interval);
    }
}

/// Synthetic frames whose size tracks a JPEG of the configured
/// resolution and quality
pub struct TestPatternSource {
    width: u32,
    height: u32,
    quality: u8,
    frame_len: usize,
    frames_generated: u64,
    pacer: FramePacer,
    start_time: Instant,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, quality: u8, fps: u32) -> Self {
        let frame_len = Self::estimate_frame_len(width, height, quality);
        Self {
            width,
            height,
            quality,
            frame_len,
            frames_generated: 0,
            pacer: FramePacer::new(fps),
            start_time: Instant::now(),
        }
    }

    /// Rough JPEG size: ~0.25 bytes per pixel per 100 quality points.
    /// 640x480 at quality 50 gives 38400 bytes.
    pub fn estimate_frame_len(width: u32, height: u32, quality: u8) -> usize {
        let pixels = width as usize * height as usize;
        (pixels * quality.clamp(1, 100) as usize / 400).max(1)
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn frames_generated(&self) -> u64 {
        self.frames_generated
    }

    fn render(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len);
        let shift = self.frames_generated as usize;
        for i in 0..self.frame_len {
            buf.put_u8((i.wrapping_add(shift) % 251) as u8);
        }
        buf.freeze()
    }
}

impl FrameSource for TestPatternSource {
    fn capture_and_encode(&mut self) -> Result<EncodedFrame, CaptureError> {
        self.pacer.wait();

        let payload = self.render();
        self.frames_generated += 1;

        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        Ok(EncodedFrame::new(payload, timestamp_ns))
    }

    fn describe(&self) -> String {
        format!(
            "test pattern {}x{} q{} ({} bytes/frame)",
            self.width, self.height, self.quality, self.frame_len
        )
    }
}

/// Replays pre-encoded JPEG files from a directory in name order, looping
pub struct FileSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    pacer: FramePacer,
    start_time: Instant,
}

impl FileSequenceSource {
    pub fn open(dir: &Path, fps: u32) -> Result<Self, CaptureError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg_path(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "no JPEG files in {}",
                dir.display()
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next_index: 0,
            pacer: FramePacer::new(fps),
            start_time: Instant::now(),
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl FrameSource for FileSequenceSource {
    fn capture_and_encode(&mut self) -> Result<EncodedFrame, CaptureError> {
        self.pacer.wait();

        let path = &self.files[self.next_index];
        self.next_index = (self.next_index + 1) % self.files.len();

        let data = std::fs::read(path)
            .map_err(|e| CaptureError::GrabFailed(format!("{}: {}", path.display(), e)))?;
        if data.is_empty() {
            return Err(EncodeError::EmptyOutput.into());
        }

        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        Ok(EncodedFrame::new(Bytes::from(data), timestamp_ns))
    }

    fn describe(&self) -> String {
        format!("{} JPEG files from {}", self.files.len(), self.dir.display())
    }
}
