//! HTTP API handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::network::receiver::ReceiverStatsSnapshot;
use crate::network::sender::SenderStatsSnapshot;
use crate::protocol::{ControlCommand, StreamState};
use crate::ui::server::{AppRole, AppState};

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SystemStatus {
    Sender {
        state: StreamState,
        started_at: DateTime<Utc>,
        uptime_seconds: u64,
        stats: SenderStatsSnapshot,
    },
    Receiver {
        started_at: DateTime<Utc>,
        uptime_seconds: u64,
        queued_frames: usize,
        display_dropped: u64,
        latest_frame_id: Option<u32>,
        stats: ReceiverStatsSnapshot,
    },
}

/// Reply to a stream start/stop request
#[derive(Serialize)]
pub struct StreamReply {
    pub state: StreamState,
    pub reply: String,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let uptime_seconds = state.started.elapsed().as_secs();
    let started_at = state.started_at;

    let status = match &state.role {
        AppRole::Sender { gate, stats } => SystemStatus::Sender {
            state: gate.state(),
            started_at,
            uptime_seconds,
            stats: stats.snapshot(),
        },
        AppRole::Receiver {
            stats,
            frames,
            latest,
        } => SystemStatus::Receiver {
            started_at,
            uptime_seconds,
            queued_frames: frames.len(),
            display_dropped: frames.dropped_count(),
            latest_frame_id: latest.read().as_ref().map(|frame| frame.frame_id),
            stats: stats.snapshot(),
        },
    };

    Json(ApiResponse::ok(status))
}

fn apply_command(state: &AppState, command: ControlCommand) -> (StatusCode, Json<ApiResponse<StreamReply>>) {
    match &state.role {
        AppRole::Sender { gate, .. } => {
            let reply = gate.apply(command);
            (
                StatusCode::OK,
                Json(ApiResponse::ok(StreamReply {
                    state: gate.state(),
                    reply: reply.to_string(),
                })),
            )
        }
        AppRole::Receiver { .. } => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Not a sender")),
        ),
    }
}

/// Start streaming
pub async fn start_stream(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<StreamReply>>) {
    apply_command(&state, ControlCommand::Start)
}

/// Stop streaming
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<StreamReply>>) {
    apply_command(&state, ControlCommand::Stop)
}

/// Most recent complete frame as a JPEG
pub async fn get_latest_frame(State(state): State<Arc<AppState>>) -> Response {
    let frame = match &state.role {
        AppRole::Receiver { latest, .. } => latest.read().clone(),
        AppRole::Sender { .. } => None,
    };

    match frame {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            frame.payload,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("No frame received yet")),
        )
            .into_response(),
    }
}
