//! Poll REST routes.
//!
//! The history endpoint keeps the `{success, data}` / `{success, error}`
//! envelope browser dashboards already parse; room stats are a bare JSON
//! document with status-code errors.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::services::poll::{self, PollError, RoomStats};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub room_id: Option<String>,
}

pub(crate) fn poll_error_to_status(err: &PollError) -> StatusCode {
    match err {
        PollError::RoomNotFound | PollError::NotFound | PollError::UserNotFound => StatusCode::NOT_FOUND,
        PollError::Validation(_) | PollError::InvalidOption => StatusCode::BAD_REQUEST,
        PollError::QuotaExceeded(_)
        | PollError::PendingAnswers(_)
        | PollError::NotActive
        | PollError::DuplicateAnswer => StatusCode::CONFLICT,
        PollError::Room(_) | PollError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn envelope_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "success": false, "error": message }))).into_response()
}

/// `GET /api/polls/history?roomId=CODE` - every poll of the room with
/// counts and percentages, newest first.
pub async fn poll_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Response {
    let Some(room_id) = query.room_id.filter(|r| !r.trim().is_empty()) else {
        return envelope_error(StatusCode::BAD_REQUEST, "Room ID is required");
    };

    match poll::get_poll_history(&state, &room_id).await {
        Ok(data) => Json(serde_json::json!({ "success": true, "data": data })).into_response(),
        Err(e) => {
            error!(%room_id, error = %e, "poll history failed");
            envelope_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch poll history")
        }
    }
}

/// `GET /api/rooms/:room_id/stats` - poll quota usage for one room.
pub async fn room_stats(State(state): State<AppState>, Path(room_id): Path<String>) -> Result<Json<RoomStats>, StatusCode> {
    let stats = poll::get_room_stats(&state, &room_id)
        .await
        .map_err(|e| poll_error_to_status(&e))?;
    Ok(Json(stats))
}

/// `GET /api/polls/:poll_id/answers/:user_id` - whether the user has
/// answered the poll.
pub async fn answered(
    State(state): State<AppState>,
    Path((poll_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let answered = poll::has_user_answered(&state, poll_id, user_id)
        .await
        .map_err(|e| poll_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "pollId": poll_id, "userId": user_id, "answered": answered })))
}

#[cfg(test)]
#[path = "polls_test.rs"]
mod tests;
