//! One worker: a dedicated OS thread owning one [`kiln_runtime::Handle`].
//!
//! The native generation step is blocking, so each worker runs on its own
//! `std::thread` rather than as a tokio task — mirroring how this
//! workspace's model-execution workers have always been dispatched, to
//! avoid stalling the async runtime's worker threads on native calls.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use kiln_runtime::{Handle, RuntimeError, SamplingParams};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{StreamToken, Usage};

/// One request handed to a worker by the dispatcher.
pub(crate) struct WorkItem {
    pub prompt: String,
    pub params: SamplingParams,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    pub tokens_tx: mpsc::Sender<StreamToken>,
}

/// `idle → busy → {idle | draining} → closed`, as an atomic for
/// cheap cross-thread introspection (pool stats, health checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Busy = 1,
    Draining = 2,
    Closed = 3,
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Busy,
            2 => WorkerState::Draining,
            _ => WorkerState::Closed,
        }
    }
}

/// Shared, lock-free view of one worker's liveness and counters.
pub(crate) struct WorkerSlot {
    state: AtomicU8,
    requests_served: AtomicUsize,
    tokens_produced: AtomicUsize,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            requests_served: AtomicUsize::new(0),
            tokens_produced: AtomicUsize::new(0),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, s: WorkerState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    pub(crate) fn requests_served(&self) -> usize {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub(crate) fn tokens_produced(&self) -> usize {
        self.tokens_produced.load(Ordering::Relaxed)
    }
}

pub(crate) fn new_slot() -> Arc<WorkerSlot> {
    Arc::new(WorkerSlot::new())
}

/// Runs the worker loop on the calling (dedicated) thread until `rx` closes
/// or this worker hits a fatal runtime error.
///
/// `idle_tx` announces this worker's id every time it becomes free to take
/// another item; the dispatcher treats the first id it receives as "the
/// first idle worker". `closing` is flipped by [`crate::pool::Pool::close`]
/// before the admission queue is torn down; a worker that observes it while
/// busy finishes the in-flight request, then stops announcing idle instead
/// of looping back for more work (§4.2 `busy → draining → closed`).
pub(crate) fn run(
    worker_id: usize,
    mut handle: Handle,
    mut rx: mpsc::Receiver<WorkItem>,
    idle_tx: mpsc::Sender<usize>,
    slot: Arc<WorkerSlot>,
    workers_alive: Arc<AtomicUsize>,
    closing: Arc<AtomicBool>,
) {
    if idle_tx.blocking_send(worker_id).is_err() {
        return;
    }

    while let Some(item) = rx.blocking_recv() {
        if Instant::now() >= item.deadline {
            let _ = item.tokens_tx.try_send(StreamToken::terminal("timeout"));
            if idle_tx.blocking_send(worker_id).is_err() {
                break;
            }
            continue;
        }

        slot.set_state(WorkerState::Busy);
        let outcome = process(&mut handle, &item, &closing, &slot);
        slot.requests_served.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(tokens) => slot.tokens_produced.fetch_add(tokens, Ordering::Relaxed),
            Err(err) => {
                retire(worker_id, &err, &slot, &workers_alive);
                return;
            }
        };

        if closing.load(Ordering::SeqCst) {
            break;
        }

        slot.set_state(WorkerState::Idle);
        if idle_tx.blocking_send(worker_id).is_err() {
            break;
        }
    }

    slot.set_state(WorkerState::Closed);
}

/// Retires a worker after a fatal runtime error: marks its slot closed and
/// drops it out of the pool's live-worker count. Split out of [`run`] so the
/// isolation guarantee — that one worker's retirement touches only its own
/// slot and counter, never a sibling's — is exercisable without a real
/// [`Handle`].
fn retire(worker_id: usize, err: &RuntimeError, slot: &WorkerSlot, workers_alive: &AtomicUsize) {
    tracing::error!(worker_id, %err, "worker hit a fatal runtime error, retiring");
    slot.set_state(WorkerState::Closed);
    workers_alive.fetch_sub(1, Ordering::SeqCst);
}

/// Runs one request to completion, forwarding every step to `item.tokens_tx`.
///
/// Returns the number of completion tokens produced. Returns `Err` only for
/// a fatal runtime error (the worker must then be retired); a recoverable
/// per-request error is instead delivered as the terminal element of the
/// token sequence.
///
/// If `closing` is observed set partway through, the slot is moved to
/// [`WorkerState::Draining`] — generation still runs to its natural
/// terminal token rather than being cut short; only the admission of
/// further work is what draining withholds.
fn process(
    handle: &mut Handle,
    item: &WorkItem,
    closing: &AtomicBool,
    slot: &WorkerSlot,
) -> Result<usize, RuntimeError> {
    // Best-effort: if counting the prompt fails, usage just comes back zeroed
    // rather than failing the whole request over an accounting detail.
    let prompt_tokens = handle.count_tokens(&item.prompt).unwrap_or(0);
    let mut completion_tokens = 0usize;

    let cancel = item.cancel.clone();
    let is_cancelled = move || cancel.is_cancelled();
    let generation = handle.generate(&item.prompt, item.params.clone(), &is_cancelled)?;

    for step in generation {
        if closing.load(Ordering::SeqCst) {
            slot.set_state(WorkerState::Draining);
        }
        match step {
            Ok(step) => {
                if !step.text.is_empty() {
                    completion_tokens += 1;
                }
                let frame = if step.done {
                    StreamToken::terminal_with_text(
                        step.text,
                        step.finish_reason.unwrap_or_else(|| "stop".to_owned()),
                    )
                    .with_usage(Usage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    })
                } else {
                    StreamToken::delta(step.text)
                };
                let done = frame.is_complete;
                if item.tokens_tx.blocking_send(frame).is_err() {
                    // Receiver dropped: client disconnected mid-stream.
                    return Ok(completion_tokens);
                }
                if done {
                    return Ok(completion_tokens);
                }
            }
            Err(err) => {
                let fatal = matches!(err, RuntimeError::GenerateFatal { .. });
                let _ = item.tokens_tx.blocking_send(StreamToken::error(err.to_string()));
                return if fatal { Err(err) } else { Ok(completion_tokens) };
            }
        }
    }
    Ok(completion_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Property 5 (worker isolation): retiring one worker after a fatal
    /// runtime error must not disturb a sibling worker's slot or the shared
    /// live-worker count beyond its own decrement.
    #[test]
    fn retiring_one_worker_does_not_affect_a_sibling() {
        let workers_alive = Arc::new(AtomicUsize::new(2));
        let failing = new_slot();
        let sibling = new_slot();
        sibling.set_state(WorkerState::Busy);

        let err = RuntimeError::GenerateFatal {
            message: "context corrupted".into(),
        };
        retire(0, &err, &failing, &workers_alive);

        assert_eq!(failing.state(), WorkerState::Closed);
        assert_eq!(workers_alive.load(Ordering::SeqCst), 1);
        assert_eq!(sibling.state(), WorkerState::Busy);
    }

    /// Mirrors the check `process` makes mid-generation: a busy worker that
    /// observes the shutdown flag moves to `Draining`, not straight to
    /// `Closed` — it still owns an in-flight request.
    #[test]
    fn closing_flag_moves_a_busy_worker_to_draining() {
        let slot = new_slot();
        slot.set_state(WorkerState::Busy);
        let closing = AtomicBool::new(true);

        if closing.load(Ordering::SeqCst) {
            slot.set_state(WorkerState::Draining);
        }

        assert_eq!(slot.state(), WorkerState::Draining);
    }

    #[test]
    fn worker_state_round_trips_through_u8() {
        for s in [
            WorkerState::Idle,
            WorkerState::Busy,
            WorkerState::Draining,
            WorkerState::Closed,
        ] {
            assert_eq!(WorkerState::from(s as u8), s);
        }
    }
}
