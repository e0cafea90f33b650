//! Admin endpoints
//!
//! Read-only operator surface: a liveness probe and a participant
//! snapshot. Snapshots go through the dispatcher, so they are internally
//! consistent with respect to tree mutations.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::registry::ParticipantSnapshot;

use super::listener::AppState;

/// Handler for `GET /`, the liveness probe
pub async fn index() -> &'static str {
    "treecast signaling server\n"
}

/// Handler for `GET /admin/rooms`: snapshot of every participant
pub async fn rooms(State(state): State<Arc<AppState>>) -> Json<Vec<ParticipantSnapshot>> {
    Json(state.dispatcher.snapshot().await)
}
