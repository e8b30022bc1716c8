//! Converts a per-request token channel into wire frames (SSE or JSON-RPC).
//!
//! Ordering and terminal-frame invariants are enforced once, here; [`sse`]
//! and [`rpc`] only know how to format a single [`crate::types::StreamToken`]
//! into their respective wire shape.

pub mod rpc;
pub mod sse;

use tokio::sync::mpsc;

use crate::types::StreamToken;

/// Drains `rx` and calls `on_token` for every element in production order,
/// stopping immediately after the terminal element (`is_complete` or
/// `error.is_some()`). Returns once the channel is closed or `on_token`
/// requests early termination.
///
/// `on_token` returning `false` signals the caller observed a client
/// disconnect (e.g. a failed write); `drive` then stops reading without
/// waiting for a terminal frame. Cancelling the upstream worker on that
/// path is the caller's responsibility (it owns the request's cancellation
/// token); `drive` only controls how frames are pulled off this channel.
pub async fn drive<F>(mut rx: mpsc::Receiver<StreamToken>, mut on_token: F)
where
    F: FnMut(StreamToken) -> bool,
{
    while let Some(token) = rx.recv().await {
        let is_terminal = token.is_complete || token.error.is_some();
        if !on_token(token) {
            return;
        }
        if is_terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_after_terminal_frame() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamToken::delta("a")).await.unwrap();
        tx.send(StreamToken::terminal("stop")).await.unwrap();
        drop(tx);

        let mut seen = Vec::new();
        drive(rx, |t| {
            seen.push(t);
            true
        })
        .await;

        assert_eq!(seen.len(), 2);
        assert!(seen.last().unwrap().is_complete);
    }

    #[tokio::test]
    async fn stops_early_when_sink_requests_it() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamToken::delta("a")).await.unwrap();
        tx.send(StreamToken::delta("b")).await.unwrap();
        tx.send(StreamToken::terminal("stop")).await.unwrap();

        let mut count = 0;
        drive(rx, |_| {
            count += 1;
            count < 1
        })
        .await;

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn error_token_is_also_terminal() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamToken::delta("a")).await.unwrap();
        tx.send(StreamToken::error("boom")).await.unwrap();
        tx.send(StreamToken::delta("unreachable")).await.unwrap();

        let mut seen = Vec::new();
        drive(rx, |t| {
            seen.push(t);
            true
        })
        .await;

        assert_eq!(seen.len(), 2);
        assert!(seen[1].error.is_some());
    }
}
