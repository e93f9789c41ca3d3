//! Session presence routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub session_id: String,
    pub room_code: String,
    pub lock_mode: bool,
    pub is_active: bool,
    /// User ids currently live in the session, ordered.
    pub participants: Vec<String>,
}

/// `GET /api/sessions/:id/presence`: live participants of a room.
pub async fn presence(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PresenceResponse>, StatusCode> {
    let room = state
        .storage
        .find_room(&session_id)
        .await
        .map_err(|e| {
            tracing::error!(%session_id, error = %e, "presence: room lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let presence = state.presence.read().await;
    let participants = presence
        .members(&session_id)
        .into_iter()
        .map(|(user_id, _)| user_id)
        .collect();
    // The live flag wins while the session has members; the stored flag covers the rest.
    let lock_mode = presence.lock_mode(&session_id).unwrap_or(room.lock_mode_enabled);

    Ok(Json(PresenceResponse {
        session_id,
        room_code: room.room_code,
        lock_mode,
        is_active: room.is_active,
        participants,
    }))
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
