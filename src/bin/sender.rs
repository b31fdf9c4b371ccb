//! Camera Sender Application
//!
//! Captures frames, splits them into UDP chunks and streams them to the
//! receiver while a controller has streaming switched on.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_camera_streamer::{
    codec::Packetizer,
    config::{parse_resolution, AppConfig, SourceKind},
    control::{ControlGate, ControlServer},
    network::{sender_socket, TransportLoop},
    ui::{AppRole, AppState, WebServer},
    video::source,
};

#[derive(Parser, Debug)]
#[command(name = "sender", version, about = "Stream camera frames to a receiver over UDP")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Receiver address, host:port
    #[arg(short, long)]
    destination: Option<String>,

    /// TCP port for START/STOP commands
    #[arg(long)]
    control_port: Option<u16>,

    /// Capture resolution, e.g. 640x480
    #[arg(short, long)]
    resolution: Option<String>,

    /// JPEG quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Frame bytes per UDP chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Frame source
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Directory of JPEG files for the `files` source
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// HTTP port for the status UI
    #[arg(long)]
    ui_port: Option<u16>,

    /// Disable the status UI
    #[arg(long)]
    no_ui: bool,

    /// Start streaming without waiting for a START command
    #[arg(long)]
    autostart: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(destination) = &self.destination {
            config.network.destination = destination.clone();
        }
        if let Some(port) = self.control_port {
            config.control.port = port;
        }
        if let Some(resolution) = &self.resolution {
            let (width, height) = parse_resolution(resolution)?;
            config.capture.width = width;
            config.capture.height = height;
        }
        if let Some(quality) = self.quality {
            config.capture.jpeg_quality = quality;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.network.max_chunk_payload = chunk_size;
        }
        if let Some(source) = self.source {
            config.capture.source = source;
        }
        if let Some(dir) = &self.frames_dir {
            config.capture.frames_dir = Some(dir.clone());
            if self.source.is_none() {
                config.capture.source = SourceKind::Files;
            }
        }
        if let Some(port) = self.ui_port {
            config.ui.http_port = port;
        }
        if self.no_ui {
            config.ui.enabled = false;
        }
        Ok(())
    }
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

    // Load config, then apply command line overrides
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config)?;
    config.validate()?;

    if let Some(path) = &args.save_config {
        config.save(path)?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    tracing::info!("Starting LAN Camera Sender");

    let destination = config.network.destination_addr()?;
    let packetizer = Packetizer::new(config.network.max_chunk_payload)?;
    let frame_source = source::from_config(&config.capture).context("Failed to open frame source")?;
    let socket = sender_socket(destination, config.network.send_buffer_size)?;

    tracing::info!(
        "Source: {} | {} bytes per chunk -> {}",
        frame_source.describe(),
        packetizer.max_chunk_payload(),
        destination
    );

    let gate = ControlGate::shared();
    let cancel = CancellationToken::new();

    // Transport thread, blocked on the gate until START
    let transport = TransportLoop::new(
        frame_source,
        packetizer,
        socket,
        destination,
        gate.clone(),
        config.capture.capture_backoff(),
    );
    let stats = transport.stats();
    let mut transport_handle = transport.spawn()?;

    // Control server
    let control_server = ControlServer::bind(
        config.control.listen_addr()?,
        gate.clone(),
        config.control.max_line_length,
    )
    .await?;
    let control_task = tokio::spawn(control_server.run(cancel.clone()));

    // Web UI
    let ui_task = config.ui.enabled.then(|| {
        let state = AppState::new(AppRole::Sender {
            gate: gate.clone(),
            stats: stats.clone(),
        });
        WebServer::new(config.ui.clone(), state).start_background(cancel.clone())
    });

    if args.autostart {
        gate.start();
    } else {
        tracing::info!("Idle, waiting for START on control port {}", config.control.port);
    }

    // Periodic stats until Ctrl+C
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let mut last = stats.snapshot();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let now = stats.snapshot();
                if now.frames_sent != last.frames_sent || gate.is_streaming() {
                    tracing::info!(
                        "Stats: {} frames sent ({:.1} FPS), {} packets, {:.1} KB, {} dropped, {} send errors",
                        now.frames_sent,
                        (now.frames_sent - last.frames_sent) as f64 / 5.0,
                        now.packets_sent,
                        now.bytes_sent as f64 / 1024.0,
                        now.frames_dropped + now.encode_errors,
                        now.send_errors
                    );
                }
                last = now;
            }
        }
    }

    tracing::info!("Shutting down");
    cancel.cancel();

    // Finishes the frame in flight, then releases the socket
    tokio::task::spawn_blocking(move || transport_handle.shutdown()).await?;
    control_task.await?;
    if let Some(ui_task) = ui_task {
        ui_task.await?;
    }

    tracing::info!("Final stats: {}", serde_json::to_string(&stats.snapshot())?);
    tracing::info!("Sender stopped");
    Ok(())
}
