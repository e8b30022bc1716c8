//! JSON-RPC 2.0 control protocol over WebSocket (§4.6).
//!
//! Each connection gets a [`Session`] and two independent tasks: a read
//! pump that parses and dispatches inbound frames, and a write pump that
//! serializes outbound frames (replies, streaming results, pings) onto the
//! socket in the order they were produced. Either task exiting cancels the
//! session, which tears down the other.

pub mod methods;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::state::AppState;
use session::Session;

/// Read-pump deadline, reset by every inbound frame (valid or not) and by
/// every pong (§4.6).
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Ping cadence for the write pump (§4.6).
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Per-frame write deadline (§4.6).
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Inbound frame size limit (§3 MCPSession).
const READ_LIMIT_BYTES: usize = 512 * 1024;

/// Builds the control-protocol sub-router, mounted under `/mcp` by
/// [`crate::routes`].
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session_loop(state, socket))
}

async fn session_loop(state: AppState, socket: WebSocket) {
    let (session, outbound_rx) = Session::new();
    info!(session_id = %session.id, "control session connected");

    let (ws_tx, ws_rx) = socket.split();

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(write_pump(ws_tx, outbound_rx, session.cancel.clone()));
    tasks.spawn(read_pump(state, Arc::clone(&session), ws_rx));

    // Either task finishing (socket closed, deadline elapsed, queue
    // overflow) ends the session; wait for both to unwind cleanly.
    while tasks.join_next().await.is_some() {}
    session.cancel.cancel();

    info!(session_id = %session.id, "control session disconnected");
}

async fn read_pump(state: AppState, session: Arc<Session>, mut ws_rx: SplitStream<WebSocket>) {
    loop {
        let next = tokio::select! {
            _ = session.cancel.cancelled() => break,
            next = timeout(READ_DEADLINE, ws_rx.next()) => next,
        };

        let Ok(Some(Ok(msg))) = next else {
            break;
        };

        match msg {
            Message::Text(text) => {
                if text.len() > READ_LIMIT_BYTES {
                    continue;
                }
                session.touch().await;
                methods::handle_message(&state, &session, &text).await;
            }
            Message::Pong(_) => session.touch().await,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }
    session.cancel.cancel();
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(PING_INTERVAL);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                match timeout(WRITE_DEADLINE, ws_tx.send(msg)).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
    cancel.cancel();
}
