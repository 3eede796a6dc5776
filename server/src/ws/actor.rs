use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::chat::session::Session;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionHandle, ConnectionId};

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Keepalive task: periodic pings, gives up on a missing pong
/// - Reader loop: decodes client events and drives the session
///
/// The reader loop also exits when the keepalive task gives up, so a silent
/// peer is cleaned up without waiting for its close frame. The session
/// attaches to the presence broadcaster on creation and is cleaned up by
/// connection identity when the reader loop exits.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(tx.clone());
    let conn_id = handle.id();
    let mut session = Session::new(state.presence.clone(), handle);

    tracing::info!(conn_id = %conn_id, "WebSocket actor started");

    // Identity supplied on the upgrade request counts as an immediate identify
    if let Some(user_id) = user_id {
        if let Err(e) = session.identify(user_id) {
            session.send(&protocol::ServerEvent::error(e.code(), e.to_string(), None));
        }
    }

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut ping_handle = (state.ws.ping_interval_secs > 0).then(|| {
        tokio::spawn(keepalive_task(
            conn_id,
            tx.clone(),
            pong_rx,
            Duration::from_secs(state.ws.ping_interval_secs),
            Duration::from_secs(state.ws.pong_timeout_secs),
        ))
    });

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = keepalive_expired(&mut ping_handle) => {
                tracing::info!(conn_id = %conn_id, "Keepalive expired, dropping connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &mut session, &state);
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        conn_id = %conn_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        conn_id = %conn_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    conn_id = %conn_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(conn_id = %conn_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    if let Some(ping_handle) = ping_handle {
        ping_handle.abort();
    }

    let user_id = session.user_id().map(str::to_string);
    let cleanup = session.close();

    tracing::info!(
        conn_id = %conn_id,
        user_id = ?user_id,
        cleanup = ?cleanup,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Resolves when the keepalive task has stopped; never resolves when
/// keepalive is disabled.
async fn keepalive_expired(handle: &mut Option<JoinHandle<()>>) {
    match handle {
        Some(handle) => {
            let _ = handle.await;
        }
        None => std::future::pending().await,
    }
}

/// Sends a ping every `ping_interval` and returns once a pong fails to
/// arrive within `pong_timeout` or the connection's channel is gone.
async fn keepalive_task(
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(conn_id = %conn_id, "Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
