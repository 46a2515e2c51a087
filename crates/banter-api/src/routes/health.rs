//! Liveness endpoint with voice-plane gauges.

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use banter_voice::VoiceStats;
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    voice: VoiceStats,
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        voice: state.voice.stats(),
    })
}
