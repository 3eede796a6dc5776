//! REST endpoints for conversation history.
//!
//! These cover clients without a live socket: reading a conversation and
//! appending to history without live delivery.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chat::relay;
use crate::history::ConversationEntry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GetConversationRequest {
    pub from: String,
    pub to: String,
    /// Whose perspective `fromSelf` is computed from. Defaults to `from`.
    pub viewer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    pub from: String,
    pub to: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddMessageResponse {
    pub msg: String,
    pub id: String,
}

/// POST /api/messages/getmsg -- Full conversation between two users, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    Json(body): Json<GetConversationRequest>,
) -> Result<Json<Vec<ConversationEntry>>, StatusCode> {
    if body.from.trim().is_empty() || body.to.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let history = state.history.clone();
    let viewer = body.viewer.unwrap_or_else(|| body.from.clone());

    let entries = tokio::task::spawn_blocking(move || {
        history.query_conversation(&body.from, &body.to, &viewer)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to read conversation");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(entries))
}

/// POST /api/messages/addmsg -- Append to history without live delivery.
pub async fn add_message(
    State(state): State<AppState>,
    Json(body): Json<AddMessageRequest>,
) -> Result<(StatusCode, Json<AddMessageResponse>), StatusCode> {
    if body.from.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    relay::validate_message(&body.to, &body.message, state.max_message_len)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let history = state.history.clone();
    let stored = tokio::task::spawn_blocking(move || {
        history.append(&body.from, &body.to, &body.message, Utc::now())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to add message");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        StatusCode::CREATED,
        Json(AddMessageResponse {
            msg: "Message added successfully".to_string(),
            id: stored.id,
        }),
    ))
}
