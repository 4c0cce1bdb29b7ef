use super::state::AppState;
use crate::relay::{RelaySnapshot, TranscriptLog};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: f64,
    pub timestamp: String,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    debug!("Health check hit");

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            uptime_secs: state.started_at.elapsed().as_secs_f64(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            active_sessions: state.active_relays().await,
        }),
    )
}

/// GET /api/sessions
/// List live relays with their statistics
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let relays: Vec<_> = state.relays.read().await.values().cloned().collect();

    let mut snapshots: Vec<RelaySnapshot> = Vec::with_capacity(relays.len());
    for relay in relays {
        snapshots.push(relay.snapshot().await);
    }
    snapshots.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

    (StatusCode::OK, Json(snapshots))
}

/// GET /api/sessions/:connection_id/transcript
/// Get transcript for a connection (accumulated so far)
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> impl IntoResponse {
    let relay = state.relays.read().await.get(&connection_id).cloned();

    match relay {
        Some(relay) => {
            let transcript: TranscriptLog = relay.transcript().await;
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", connection_id),
            }),
        )
            .into_response(),
    }
}
