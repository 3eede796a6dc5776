use axum::Router;

use crate::chat::{messages, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity via query param or an identify event)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let message_routes = Router::new()
        .route(
            "/api/messages/getmsg",
            axum::routing::post(messages::get_conversation),
        )
        .route(
            "/api/messages/addmsg",
            axum::routing::post(messages::add_message),
        );

    let presence_routes =
        Router::new().route("/api/presence", axum::routing::get(presence::get_presence));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(presence_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
