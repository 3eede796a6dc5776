use std::sync::Arc;

use crate::chat::presence::Presence;
use crate::config::{Config, WsConfig};
use crate::history::HistoryStore;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry plus presence fan-out
    pub presence: Arc<Presence>,
    /// Durable conversation history
    pub history: Arc<dyn HistoryStore>,
    /// Keepalive settings for each socket
    pub ws: WsConfig,
    /// Longest accepted message, in characters
    pub max_message_len: usize,
}

impl AppState {
    pub fn new(history: Arc<dyn HistoryStore>, config: &Config) -> Self {
        Self {
            presence: Arc::new(Presence::new()),
            history,
            ws: config.ws.clone(),
            max_message_len: config.history.max_message_len,
        }
    }
}
