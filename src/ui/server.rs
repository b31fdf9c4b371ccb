//! HTTP server for the status API

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::control::SharedControlGate;
use crate::error::NetworkError;
use crate::network::receiver::{ReceiverStats, SharedLatestFrame};
use crate::network::sender::SenderStats;
use crate::ui::handlers;
use crate::video::SharedFrameQueue;

/// What the process is doing, and the handles the API reads from
pub enum AppRole {
    Sender {
        gate: SharedControlGate,
        stats: Arc<SenderStats>,
    },
    Receiver {
        stats: Arc<ReceiverStats>,
        frames: SharedFrameQueue,
        latest: SharedLatestFrame,
    },
}

/// Shared state for handlers
pub struct AppState {
    pub role: AppRole,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(role: AppRole) -> Self {
        Self {
            role,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn is_sender(&self) -> bool {
        matches!(self.role, AppRole::Sender { .. })
    }
}

/// Web server for the status API
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Routes for the configured role
    pub fn router(&self) -> Router {
        let mut router = Router::new().route("/api/status", get(handlers::get_status));

        router = if self.state.is_sender() {
            router
                .route("/api/stream/start", post(handlers::start_stream))
                .route("/api/stream/stop", post(handlers::stop_stream))
        } else {
            router.route("/api/frame/latest", get(handlers::get_latest_frame))
        };

        router
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), NetworkError> {
        let addr = self
            .config
            .listen_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        tracing::info!("Web UI available at http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))
    }

    /// Start the server on the current runtime
    pub fn start_background(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(cancel).await {
                tracing::error!("Web UI failed: {}", e);
            }
        })
    }
}
