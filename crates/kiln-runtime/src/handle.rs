//! The per-worker runtime handle: one exclusive inference context bound to
//! a shared [`Model`], and the generation loop that turns sampled tokens
//! into text.
//!
//! A `Handle` is `Send` (a worker moves it into its own task) but not
//! `Sync` — it is never shared between threads, only handed off, matching
//! the "one owner at a time" contract the rest of this workspace relies on.

use std::cell::Cell;
use std::ffi::c_void;
use std::sync::Arc;
use std::time::Instant;

use crate::error::RuntimeError;
use crate::model::Model;

/// Sampling parameters for one generation call.
#[derive(Clone, Debug)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            stop: Vec::new(),
        }
    }
}

/// One step of a generation, as produced by the [`Generation`] iterator.
#[derive(Clone, Debug)]
pub struct GenerationStep {
    pub text: String,
    pub done: bool,
    pub finish_reason: Option<String>,
}

/// Point-in-time statistics for a loaded runtime handle.
#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub model_loaded: bool,
    pub gpu_layers_loaded: i32,
    pub memory_usage_bytes: u64,
    pub tokens_processed: u64,
    pub requests_served: u64,
    pub average_tokens_per_sec: f64,
}

/// A minimal xorshift64* generator. This workspace has no RNG crate in its
/// dependency tree; sampling only needs a fast, non-cryptographic source of
/// randomness local to one handle.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }
}

/// One worker's exclusive inference context against a shared [`Model`].
///
/// Created by [`Model::new_handle`]. Not goroutine-safe in spirit: every
/// method takes `&mut self` so the borrow checker itself enforces that no
/// two calls overlap.
pub struct Handle {
    model: Arc<Model>,
    ctx: *mut c_void,
    gpu_layers: i32,
    tokens_processed: Cell<u64>,
    requests_served: Cell<u64>,
    total_generate_millis: Cell<u64>,
    seed: Cell<u64>,
}

// SAFETY: `ctx` is exclusive to this `Handle`; nothing else holds a pointer
// to it. Moving a `Handle` (and the raw pointer it carries) to another
// thread is sound because the native library only requires that a given
// context not be touched concurrently, which `&mut self` already prevents.
unsafe impl Send for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        self.model.lib.free_context(self.ctx);
    }
}

impl Handle {
    pub(crate) fn new(model: Arc<Model>, ctx: *mut c_void) -> Self {
        Self {
            model,
            ctx,
            gpu_layers: 0,
            tokens_processed: Cell::new(0),
            requests_served: Cell::new(0),
            total_generate_millis: Cell::new(0),
            seed: Cell::new(0x9e3779b97f4a7c15),
        }
    }

    pub fn model_path(&self) -> &str {
        self.model.path()
    }

    /// Tokenize `text` and return only the token count, without decoding it
    /// into the context. Used for prompt-token accounting.
    pub fn count_tokens(&self, text: &str) -> Result<usize, RuntimeError> {
        Ok(self.model.lib.tokenize(self.model.vocab, text)?.len())
    }

    /// Tokenize, prefill and start streaming a generation for `prompt`.
    ///
    /// `cancelled` is polled once per produced token; the native decode/
    /// sample step itself cannot be interrupted mid-call, so cancellation
    /// latency is bounded by one token time.
    pub fn generate<'a>(
        &'a mut self,
        prompt: &str,
        params: SamplingParams,
        cancelled: &'a dyn Fn() -> bool,
    ) -> Result<Generation<'a>, RuntimeError> {
        let lib = &self.model.lib;
        lib.kv_cache_clear(self.ctx);

        let prompt_tokens = lib.tokenize(self.model.vocab, prompt)?;
        if !prompt_tokens.is_empty() {
            lib.decode(self.ctx, &prompt_tokens)?;
        }

        self.requests_served.set(self.requests_served.get() + 1);
        let seed = self.seed.get();
        self.seed.set(seed.wrapping_mul(6364136223846793005).wrapping_add(1));

        Ok(Generation {
            handle: self,
            params,
            cancelled,
            rng: Rng::new(seed ^ (prompt.len() as u64)),
            produced: 0,
            buffer: String::new(),
            finished: false,
            started: Instant::now(),
        })
    }

    pub fn stats(&self) -> RuntimeStats {
        let tokens = self.tokens_processed.get();
        let millis = self.total_generate_millis.get();
        let average_tokens_per_sec = if millis > 0 {
            tokens as f64 / (millis as f64 / 1000.0)
        } else {
            0.0
        };
        RuntimeStats {
            model_loaded: true,
            gpu_layers_loaded: self.gpu_layers,
            memory_usage_bytes: 0,
            tokens_processed: tokens,
            requests_served: self.requests_served.get(),
            average_tokens_per_sec,
        }
    }

    pub(crate) fn set_gpu_layers(&mut self, n: i32) {
        self.gpu_layers = n;
    }
}

/// Iterator over the steps of one generation.
///
/// Ends after exactly one terminal element (`done = true`): a stop
/// sequence, `max_tokens` reached, an end-of-generation token, or
/// cancellation. After the terminal element, `next()` returns `None`.
pub struct Generation<'a> {
    handle: &'a mut Handle,
    params: SamplingParams,
    cancelled: &'a dyn Fn() -> bool,
    rng: Rng,
    produced: usize,
    buffer: String,
    finished: bool,
    started: Instant,
}

impl Generation<'_> {
    fn finish(&mut self, text: String, reason: &str) -> GenerationStep {
        self.finished = true;
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.handle
            .total_generate_millis
            .set(self.handle.total_generate_millis.get() + elapsed);
        GenerationStep {
            text,
            done: true,
            finish_reason: Some(reason.to_owned()),
        }
    }
}

impl Iterator for Generation<'_> {
    type Item = Result<GenerationStep, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if (self.cancelled)() {
            return Some(Ok(self.finish(String::new(), "cancelled")));
        }

        if self.produced >= self.params.max_tokens {
            return Some(Ok(self.finish(String::new(), "length")));
        }

        let lib = &self.handle.model.lib;
        let token = match lib.sample(
            self.handle.ctx,
            self.handle.model.n_vocab,
            self.params.temperature,
            self.params.top_p,
            self.params.top_k,
            &mut || self.rng.next_f32(),
        ) {
            Ok(t) => t,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        if lib.is_eog(self.handle.model.vocab, token) {
            return Some(Ok(self.finish(String::new(), "stop")));
        }

        let piece = match lib.token_to_piece(self.handle.model.vocab, token) {
            Ok(p) => p,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        self.buffer.push_str(&piece);
        self.produced += 1;

        let stop_hit = self
            .params
            .stop
            .iter()
            .any(|s| !s.is_empty() && self.buffer.ends_with(s.as_str()));

        if let Err(err) = lib.decode(self.handle.ctx, &[token]) {
            self.finished = true;
            return Some(Err(err));
        }

        self.handle
            .tokens_processed
            .set(self.handle.tokens_processed.get() + 1);

        if stop_hit {
            // `piece` (and possibly a few tokens before it) contains the stop
            // text verbatim; trimming a stop sequence split across multiple
            // tokens is not implemented, only whole-token detection.
            return Some(Ok(self.finish(piece, "stop")));
        }

        Some(Ok(GenerationStep {
            text: piece,
            done: false,
            finish_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_produces_values_in_unit_range() {
        let mut rng = Rng::new(12345);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..=1.5).contains(&v), "value {v} wildly out of range");
        }
    }

    #[test]
    fn default_sampling_params_are_sane() {
        let p = SamplingParams::default();
        assert!(p.max_tokens > 0);
        assert!(p.temperature > 0.0);
        assert!(p.top_p > 0.0 && p.top_p <= 1.0);
    }
}
