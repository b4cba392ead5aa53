//! JSON API handlers

use axum::extract::State;
use axum::response::Json;
use mediarelay_core::RelayStatus;

use crate::server::AppState;

/// Per-worker load and session state.
pub async fn api_workloads(State(state): State<AppState>) -> Json<RelayStatus> {
    Json(state.relay.status().await)
}
