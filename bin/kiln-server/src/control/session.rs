//! Per-connection control-protocol session state (§4.6).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outbound queue capacity before a session is considered too slow to keep
/// up and is terminated rather than allowed to back up indefinitely.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// A single control-protocol WebSocket connection.
///
/// Owns the outbound side of the write pump's channel; `read_pump` and
/// `methods::handle_message` only ever talk to the session through
/// [`Session::send`] and [`Session::cancel`], never touching the socket
/// directly.
pub struct Session {
    pub id: Uuid,
    outbound: mpsc::Sender<Message>,
    last_ping: Mutex<Instant>,
    /// Cancelled to tear down this session's read, write and ping tasks,
    /// and propagated into every in-flight [`kiln_core::CompletionRequest`]
    /// this session submitted so generation stops with the connection.
    pub cancel: CancellationToken,
}

impl Session {
    /// Creates a session and the write pump's receiving half.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            outbound: tx,
            last_ping: Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Enqueues a frame for the write pump. A full queue means the client
    /// isn't keeping up; the session is terminated rather than buffering
    /// without bound or blocking the caller.
    pub fn send(&self, msg: Message) -> bool {
        self.outbound.try_send(msg).is_ok()
    }

    /// [`Session::send`], terminating the session on failure.
    pub fn send_or_close(&self, msg: Message) {
        if !self.send(msg) {
            self.cancel.cancel();
        }
    }

    pub async fn touch(&self) {
        *self.last_ping.lock().await = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_succeeds_while_queue_has_room() {
        let (session, mut rx) = Session::new();
        assert!(session.send(Message::Text("hi".to_owned().into())));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_or_close_cancels_session_when_queue_is_full() {
        let (session, _rx) = Session::new();
        for _ in 0..SEND_QUEUE_CAPACITY {
            assert!(session.send(Message::Text("x".to_owned().into())));
        }
        session.send_or_close(Message::Text("overflow".to_owned().into()));
        assert!(session.cancel.is_cancelled());
    }
}
