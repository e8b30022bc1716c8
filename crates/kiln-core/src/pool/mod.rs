//! The worker pool: a bounded admission queue in front of a fixed set of
//! workers, each exclusively owning one native runtime handle.

mod admission;
pub(crate) mod worker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kiln_runtime::{ContextParams, Model, RuntimeStats, SamplingParams};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::PoolError;
use crate::types::{Choice, CompletionRequest, CompletionResponse, PoolStats, StreamToken, Usage};
use admission::{dispatch_loop, AdmissionQueue};
use worker::{new_slot, WorkItem, WorkerSlot};

/// Parameters consumed by [`Pool::initialize`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub library_path: PathBuf,
    pub model_path: String,
    pub context_size: u32,
    pub gpu_layers: i32,
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("libllama.so"),
            model_path: String::new(),
            context_size: 4096,
            gpu_layers: 0,
            num_workers: 1,
            queue_capacity: 64,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// The bounded queue + fixed worker set that services completion requests.
///
/// Constructed once via [`Pool::initialize`] and shared (behind an `Arc`)
/// by every HTTP/JSON-RPC handler for the life of the process.
pub struct Pool {
    model: Arc<Model>,
    queue: AdmissionQueue,
    worker_slots: Vec<Arc<WorkerSlot>>,
    worker_threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    workers_alive: Arc<AtomicUsize>,
    default_timeout: Duration,
    closed: AtomicBool,
    closing: Arc<AtomicBool>,
}

impl Pool {
    /// Loads the model once and constructs `config.num_workers` workers,
    /// each with its own inference context against the shared weights.
    ///
    /// Fails if the model cannot be loaded or if any worker's context
    /// cannot be created.
    pub async fn initialize(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        let model_path = config.model_path.clone();
        let library_path = config.library_path.clone();
        let gpu_layers = config.gpu_layers;

        // Model loading and context creation are blocking native calls.
        let model = tokio::task::block_in_place(|| Model::load(&library_path, &model_path, gpu_layers))?;

        let (queue, queue_rx, queued) = AdmissionQueue::new(config.queue_capacity);
        let (idle_tx, idle_rx) = mpsc::channel::<usize>(config.num_workers.max(1));

        let workers_alive = Arc::new(AtomicUsize::new(config.num_workers));
        let closing = Arc::new(AtomicBool::new(false));
        let mut worker_txs = Vec::with_capacity(config.num_workers);
        let mut worker_slots = Vec::with_capacity(config.num_workers);
        let mut worker_threads = Vec::with_capacity(config.num_workers);

        for worker_id in 0..config.num_workers {
            let context_params = ContextParams::new().n_ctx(config.context_size);
            let handle = tokio::task::block_in_place(|| model.new_handle(context_params))?;

            let (tx, rx) = mpsc::channel::<WorkItem>(1);
            let slot = new_slot();
            worker_txs.push(tx);
            worker_slots.push(Arc::clone(&slot));

            let idle_tx = idle_tx.clone();
            let workers_alive = Arc::clone(&workers_alive);
            let closing = Arc::clone(&closing);
            let thread = std::thread::Builder::new()
                .name(format!("kiln-worker-{worker_id}"))
                .spawn(move || worker::run(worker_id, handle, rx, idle_tx, slot, workers_alive, closing))
                .map_err(|err| PoolError::Generation(format!("failed to spawn worker thread: {err}")))?;
            worker_threads.push(thread);
        }
        drop(idle_tx);

        let dispatcher = tokio::spawn(dispatch_loop(queue_rx, worker_txs, idle_rx, queued));

        Ok(Arc::new(Self {
            model,
            queue,
            worker_slots,
            worker_threads: Mutex::new(worker_threads),
            dispatcher: Mutex::new(Some(dispatcher)),
            workers_alive,
            default_timeout: config.request_timeout,
            closed: AtomicBool::new(false),
            closing,
        }))
    }

    /// Non-streaming submission: accumulates tokens and returns once the
    /// terminal element of the stream is produced.
    pub async fn submit(&self, request: CompletionRequest) -> Result<CompletionResponse, PoolError> {
        let id = format!("cmpl-{}", Uuid::new_v4());
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let rx = self.submit_stream(request).await?;
        accumulate(rx, id, created, self.model.path().to_owned()).await
    }

    /// Streaming submission: returns immediately with a receive-only token
    /// channel; tokens flow until the channel closes.
    pub async fn submit_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamToken>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let (tokens_tx, tokens_rx) = mpsc::channel(32);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let params = SamplingParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop: request.stop,
        };

        let item = WorkItem {
            prompt: request.prompt,
            params,
            deadline: Instant::now() + timeout,
            cancel: request.cancel,
            tokens_tx,
        };

        self.queue.submit(item)?;
        Ok(tokens_rx)
    }

    pub fn stats(&self) -> PoolStats {
        let active_requests = self
            .worker_slots
            .iter()
            .filter(|s| s.state() == worker::WorkerState::Busy)
            .count();
        PoolStats {
            active_requests,
            queued_requests: self.queue.queue_length(),
            total_requests: self.queue.total_requests(),
            worker_count: self.worker_slots.len(),
            queue_capacity: self.queue.capacity(),
            queue_length: self.queue.queue_length(),
        }
    }

    pub fn engine_stats(&self) -> RuntimeStats {
        RuntimeStats {
            model_loaded: true,
            gpu_layers_loaded: 0,
            memory_usage_bytes: 0,
            tokens_processed: self
                .worker_slots
                .iter()
                .map(|s| s.tokens_produced() as u64)
                .sum(),
            requests_served: self
                .worker_slots
                .iter()
                .map(|s| s.requests_served() as u64)
                .sum(),
            average_tokens_per_sec: 0.0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.workers_alive.load(Ordering::SeqCst) > 0
    }

    /// Ordered shutdown: stop accepting submissions, drain the queue
    /// (cancelling anything still waiting), signal workers, wait for them
    /// to finish, then release the shared model.
    pub async fn close(&self) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.closing.store(true, Ordering::SeqCst);
        self.queue.close();

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            let _ = dispatcher.await;
        }

        let threads = std::mem::take(&mut *self.worker_threads.lock().await);
        for thread in threads {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        Ok(())
    }
}

/// Drains a request's token channel into a single [`CompletionResponse`],
/// the body of [`Pool::submit`]. Split out as a free function, independent
/// of any `Pool`/`Model`, so the accumulation logic — including the
/// timeout/error short-circuits — is exercisable without a loaded runtime.
async fn accumulate(
    mut rx: mpsc::Receiver<StreamToken>,
    id: String,
    created: i64,
    model: String,
) -> Result<CompletionResponse, PoolError> {
    let mut text = String::new();
    let mut finish_reason = "stop".to_owned();
    let mut usage = Usage::default();

    while let Some(tok) = rx.recv().await {
        if let Some(message) = tok.error {
            return Err(PoolError::Generation(message));
        }
        if tok.is_complete && tok.finish_reason.as_deref() == Some("timeout") {
            // The worker dequeued this request after its deadline had
            // already passed (§4.3 admission policy): surfaced as a
            // distinct error rather than a 200 response carrying a
            // "timeout" finish reason, so the HTTP/JSON-RPC layers can map
            // it to their documented timeout status (§7).
            return Err(PoolError::Timeout);
        }
        text.push_str(&tok.token);
        if tok.is_complete {
            finish_reason = tok.finish_reason.unwrap_or(finish_reason);
            if let Some(u) = tok.usage {
                usage = u;
            }
            break;
        }
    }

    Ok(CompletionResponse {
        id,
        created,
        model,
        choices: vec![Choice {
            index: 0,
            text,
            finish_reason,
        }],
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_nonzero_worker_and_queue_capacity() {
        let config = PoolConfig::default();
        assert!(config.num_workers >= 1);
        assert!(config.queue_capacity >= 1);
    }

    #[tokio::test]
    async fn accumulate_surfaces_timeout_terminal_as_pool_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamToken::delta("partial")).await.unwrap();
        tx.send(StreamToken::terminal("timeout")).await.unwrap();
        drop(tx);

        let result = accumulate(rx, "cmpl-1".into(), 0, "kiln".into()).await;
        assert!(matches!(result, Err(PoolError::Timeout)));
    }

    #[tokio::test]
    async fn accumulate_surfaces_generation_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamToken::error("boom")).await.unwrap();
        drop(tx);

        let result = accumulate(rx, "cmpl-1".into(), 0, "kiln".into()).await;
        assert!(matches!(result, Err(PoolError::Generation(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn accumulate_joins_deltas_into_final_response() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamToken::delta("Hel")).await.unwrap();
        tx.send(StreamToken::delta("lo")).await.unwrap();
        tx.send(StreamToken::terminal_with_text("!", "stop"))
            .await
            .unwrap();
        drop(tx);

        let response = accumulate(rx, "cmpl-2".into(), 42, "kiln".into())
            .await
            .unwrap();
        assert_eq!(response.choices[0].text, "Hello!");
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.created, 42);
    }
}
