use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsConnectQuery {
    /// When present, the connection is identified as this user right after the upgrade.
    pub user_id: Option<String>,
}

/// GET /ws[?user_id=...]
/// WebSocket upgrade endpoint. Spawns an actor for the connection; the client
/// identifies itself either here or with an `identify` event.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(user_id = ?params.user_id, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, params.user_id))
}
