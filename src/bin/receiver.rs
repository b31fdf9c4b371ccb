//! Camera Receiver Application
//!
//! Receives UDP chunks, reassembles frames and hands them to a display
//! consumer that keeps the most recent frame on disk and in the web UI.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_camera_streamer::{
    config::AppConfig,
    network::FrameReceiver,
    ui::{AppRole, AppState, WebServer},
    video::{ReassembledFrame, SharedFrameQueue},
};

#[derive(Parser, Debug)]
#[command(name = "receiver", version, about = "Receive and reassemble camera frames over UDP")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local address to bind
    #[arg(short, long)]
    bind: Option<String>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Discard incomplete frames older than this
    #[arg(long)]
    frame_timeout_ms: Option<u64>,

    /// Completed frames held for display
    #[arg(long)]
    display_buffer: Option<usize>,

    /// Directory to write `latest.jpg` into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Also keep every displayed frame as a numbered file
    #[arg(long, requires = "output_dir")]
    save_all: bool,

    /// HTTP port for the status UI
    #[arg(long)]
    ui_port: Option<u16>,

    /// Disable the status UI
    #[arg(long)]
    no_ui: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.network.video_port = port;
        }
        if let Some(timeout) = self.frame_timeout_ms {
            config.reassembly.frame_timeout_ms = timeout;
        }
        if let Some(display_buffer) = self.display_buffer {
            config.reassembly.display_buffer = display_buffer;
        }
        if let Some(port) = self.ui_port {
            config.ui.http_port = port;
        }
        if self.no_ui {
            config.ui.enabled = false;
        }
    }
}

/// Writes displayed frames to disk
struct FrameSink {
    output_dir: Option<PathBuf>,
    save_all: bool,
}

impl FrameSink {
    fn show(&self, frame: &ReassembledFrame) -> std::io::Result<()> {
        let Some(dir) = &self.output_dir else {
            return Ok(());
        };

        if self.save_all {
            fs::write(dir.join(format!("frame_{:010}.jpg", frame.frame_id)), &frame.payload)?;
        }

        // Replace atomically so viewers never see a half-written file
        let tmp = dir.join("latest.jpg.tmp");
        fs::write(&tmp, &frame.payload)?;
        fs::rename(&tmp, dir.join("latest.jpg"))
    }
}

fn spawn_display(
    frames: SharedFrameQueue,
    sink: FrameSink,
    displayed: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("display".to_string())
        .spawn(move || {
            while !cancel.is_cancelled() {
                let Some(frame) = frames.pop_timeout(Duration::from_millis(100)) else {
                    continue;
                };
                match sink.show(&frame) {
                    Ok(()) => {
                        displayed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!("Failed to write frame {}: {}", frame.frame_id, e),
                }
            }
        })
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    tracing::info!("Starting LAN Camera Receiver");

    if let Some(dir) = &args.output_dir {
        prepare_output_dir(dir)?;
        tracing::info!("Writing frames to {}", dir.display());
    }

    let cancel = CancellationToken::new();
    let mut receiver = FrameReceiver::bind(&config.network, &config.reassembly)?;
    let stats = receiver.shared_stats();
    let frames = receiver.frames();

    // Display consumer
    let displayed = Arc::new(AtomicU64::new(0));
    let display_handle = spawn_display(
        frames.clone(),
        FrameSink {
            output_dir: args.output_dir.clone(),
            save_all: args.save_all,
        },
        displayed.clone(),
        cancel.clone(),
    )?;

    // Web UI
    let ui_task = config.ui.enabled.then(|| {
        let state = AppState::new(AppRole::Receiver {
            stats: stats.clone(),
            frames: frames.clone(),
            latest: receiver.latest_handle(),
        });
        WebServer::new(config.ui.clone(), state).start_background(cancel.clone())
    });

    // Periodic stats until Ctrl+C
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let interval = Duration::from_secs(5);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    let mut last = stats.snapshot();
    let mut last_displayed = 0u64;
    let mut last_dropped = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let now = stats.snapshot();
                let displayed_now = displayed.load(Ordering::Relaxed);
                let dropped_now = frames.dropped_count();

                let shown = displayed_now - last_displayed;
                tracing::info!(
                    "Received: {} | Displayed: {} ({:.1} FPS) | Dropped: {} | Incomplete: {} | Buffered: {}",
                    now.reassembly.frames_completed - last.reassembly.frames_completed,
                    shown,
                    shown as f64 / interval.as_secs_f64(),
                    dropped_now - last_dropped,
                    (now.reassembly.frames_timed_out + now.reassembly.frames_superseded)
                        - (last.reassembly.frames_timed_out + last.reassembly.frames_superseded),
                    now.reassembly.pending_frames
                );

                last = now;
                last_displayed = displayed_now;
                last_dropped = dropped_now;
            }
        }
    }

    tracing::info!("Shutting down");
    cancel.cancel();

    tokio::task::spawn_blocking(move || {
        receiver.stop();
        if display_handle.join().is_err() {
            tracing::error!("Display thread panicked");
        }
    })
    .await?;
    if let Some(ui_task) = ui_task {
        ui_task.await?;
    }

    tracing::info!("Final stats: {}", serde_json::to_string(&stats.snapshot())?);
    tracing::info!("Receiver stopped");
    Ok(())
}
