//! Minimal dynamic bindings to the native LLM runtime's C ABI.
//!
//! This only exposes the operation set `Load` / `Generate` / `Stats` /
//! `Close` need (the native runtime's full ABI is out of scope). Functions
//! are resolved by symbol name from a dynamically loaded shared library
//! rather than linked against a generated `-sys` crate, mirroring how
//! `Llama::new` opens the library in this workspace's predecessor.

use std::ffi::{c_char, c_void, CString};
use std::os::raw::{c_float, c_int};
use std::path::Path;

use libloading::{Library, Symbol};

use crate::error::RuntimeError;

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct CModelParams {
    pub n_gpu_layers: c_int,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub vocab_only: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct CContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: c_int,
    pub n_threads_batch: c_int,
    pub offload_kqv: bool,
    pub flash_attn: bool,
}

type ModelPtr = *mut c_void;
type ContextPtr = *mut c_void;
type VocabPtr = *const c_void;

type FnBackendInit = unsafe extern "C" fn();
type FnBackendFree = unsafe extern "C" fn();
type FnModelDefaultParams = unsafe extern "C" fn() -> CModelParams;
type FnContextDefaultParams = unsafe extern "C" fn() -> CContextParams;
type FnLoadModel = unsafe extern "C" fn(path: *const c_char, params: CModelParams) -> ModelPtr;
type FnFreeModel = unsafe extern "C" fn(model: ModelPtr);
type FnNewContext = unsafe extern "C" fn(model: ModelPtr, params: CContextParams) -> ContextPtr;
type FnFreeContext = unsafe extern "C" fn(ctx: ContextPtr);
type FnModelVocab = unsafe extern "C" fn(model: ModelPtr) -> VocabPtr;
type FnVocabNTokens = unsafe extern "C" fn(vocab: VocabPtr) -> c_int;
type FnTokenize = unsafe extern "C" fn(
    vocab: VocabPtr,
    text: *const c_char,
    text_len: c_int,
    tokens: *mut i32,
    n_tokens_max: c_int,
    add_special: bool,
    parse_special: bool,
) -> c_int;
type FnDecode =
    unsafe extern "C" fn(ctx: ContextPtr, tokens: *const i32, n_tokens: c_int) -> c_int;
type FnGetLogitsIth = unsafe extern "C" fn(ctx: ContextPtr, i: c_int) -> *const c_float;
type FnTokenToPiece = unsafe extern "C" fn(
    vocab: VocabPtr,
    token: i32,
    buf: *mut c_char,
    buf_len: c_int,
) -> c_int;
type FnIsEog = unsafe extern "C" fn(vocab: VocabPtr, token: i32) -> bool;
type FnKvCacheClear = unsafe extern "C" fn(ctx: ContextPtr);

/// Handle to the resolved entry points of a loaded native runtime library.
///
/// Kept alive for as long as any [`crate::Handle`] exists; dropping it
/// unloads the dynamic library, so it is wrapped in an `Arc` by callers.
pub struct Lib {
    _library: Library,
    backend_init: Symbol<'static, FnBackendInit>,
    backend_free: Symbol<'static, FnBackendFree>,
    model_default_params: Symbol<'static, FnModelDefaultParams>,
    context_default_params: Symbol<'static, FnContextDefaultParams>,
    load_model: Symbol<'static, FnLoadModel>,
    free_model: Symbol<'static, FnFreeModel>,
    new_context: Symbol<'static, FnNewContext>,
    free_context: Symbol<'static, FnFreeContext>,
    model_vocab: Symbol<'static, FnModelVocab>,
    vocab_n_tokens: Symbol<'static, FnVocabNTokens>,
    tokenize: Symbol<'static, FnTokenize>,
    decode: Symbol<'static, FnDecode>,
    get_logits_ith: Symbol<'static, FnGetLogitsIth>,
    token_to_piece: Symbol<'static, FnTokenToPiece>,
    is_eog: Symbol<'static, FnIsEog>,
    kv_cache_clear: Symbol<'static, FnKvCacheClear>,
}

// SAFETY: all state reachable through `Lib` is either an opaque native
// pointer only ever dereferenced by the native library itself, or a
// `Symbol` into a `Library` that outlives every access. Exactly one
// `Worker` owns a `Handle` (and therefore an `Arc<Lib>` clone) at a time;
// callers never invoke two methods concurrently on the same handle.
unsafe impl Send for Lib {}
unsafe impl Sync for Lib {}

macro_rules! resolve {
    ($lib:expr, $path:expr, $name:literal) => {
        unsafe {
            $lib.get::<_>($name)
                .map_err(|source| RuntimeError::LibraryLoad {
                    path: $path.to_path_buf(),
                    source: anyhow::Error::new(source)
                        .context(concat!("missing symbol ", $name)),
                })?
        }
    };
}

impl Lib {
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let library = unsafe { Library::new(path) }.map_err(|source| RuntimeError::LibraryLoad {
            path: path.to_path_buf(),
            source: source.into(),
        })?;

        // SAFETY: each symbol is looked up from `library` and stored
        // alongside it; `library` is never dropped before the symbols are.
        let lib = unsafe {
            let library: &'static Library = std::mem::transmute(&library);
            Self {
                backend_init: resolve!(library, path, b"llama_backend_init\0"),
                backend_free: resolve!(library, path, b"llama_backend_free\0"),
                model_default_params: resolve!(library, path, b"llama_model_default_params\0"),
                context_default_params: resolve!(library, path, b"llama_context_default_params\0"),
                load_model: resolve!(library, path, b"llama_model_load_from_file\0"),
                free_model: resolve!(library, path, b"llama_model_free\0"),
                new_context: resolve!(library, path, b"llama_init_from_model\0"),
                free_context: resolve!(library, path, b"llama_free\0"),
                model_vocab: resolve!(library, path, b"llama_model_get_vocab\0"),
                vocab_n_tokens: resolve!(library, path, b"llama_vocab_n_tokens\0"),
                tokenize: resolve!(library, path, b"llama_tokenize\0"),
                decode: resolve!(library, path, b"llama_decode\0"),
                get_logits_ith: resolve!(library, path, b"llama_get_logits_ith\0"),
                token_to_piece: resolve!(library, path, b"llama_token_to_piece\0"),
                is_eog: resolve!(library, path, b"llama_vocab_is_eog\0"),
                kv_cache_clear: resolve!(library, path, b"llama_kv_self_clear\0"),
                _library: library,
            }
        };
        Ok(lib)
    }

    pub fn backend_init(&self) {
        unsafe { (self.backend_init)() }
    }

    pub fn backend_free(&self) {
        unsafe { (self.backend_free)() }
    }

    pub fn model_default_params(&self) -> CModelParams {
        unsafe { (self.model_default_params)() }
    }

    pub fn context_default_params(&self) -> CContextParams {
        unsafe { (self.context_default_params)() }
    }

    pub fn load_model(&self, path: &str, params: CModelParams) -> Result<ModelPtr, RuntimeError> {
        let cpath = CString::new(path).map_err(|e| RuntimeError::ModelLoad {
            model_path: path.to_owned(),
            source: e.into(),
        })?;
        let ptr = unsafe { (self.load_model)(cpath.as_ptr(), params) };
        if ptr.is_null() {
            Err(RuntimeError::ModelLoad {
                model_path: path.to_owned(),
                source: anyhow::anyhow!("native library returned a null model handle"),
            })
        } else {
            Ok(ptr)
        }
    }

    pub fn free_model(&self, model: ModelPtr) {
        unsafe { (self.free_model)(model) }
    }

    pub fn new_context(
        &self,
        model: ModelPtr,
        params: CContextParams,
    ) -> Result<ContextPtr, RuntimeError> {
        let ptr = unsafe { (self.new_context)(model, params) };
        if ptr.is_null() {
            Err(RuntimeError::ContextCreate {
                source: anyhow::anyhow!("native library returned a null context handle"),
            })
        } else {
            Ok(ptr)
        }
    }

    pub fn free_context(&self, ctx: ContextPtr) {
        unsafe { (self.free_context)(ctx) }
    }

    pub fn vocab(&self, model: ModelPtr) -> VocabPtr {
        unsafe { (self.model_vocab)(model) }
    }

    pub fn vocab_n_tokens(&self, vocab: VocabPtr) -> i32 {
        unsafe { (self.vocab_n_tokens)(vocab) }
    }

    pub fn tokenize(&self, vocab: VocabPtr, text: &str) -> Result<Vec<i32>, RuntimeError> {
        let cstr = CString::new(text).map_err(|e| RuntimeError::Tokenize { source: e.into() })?;
        let mut capacity = (text.len() + 16) as c_int;
        loop {
            let mut buf = vec![0i32; capacity as usize];
            let n = unsafe {
                (self.tokenize)(
                    vocab,
                    cstr.as_ptr(),
                    text.len() as c_int,
                    buf.as_mut_ptr(),
                    capacity,
                    true,
                    true,
                )
            };
            if n >= 0 {
                buf.truncate(n as usize);
                return Ok(buf);
            }
            // Negative return means -required_capacity.
            capacity = -n;
        }
    }

    pub fn decode(&self, ctx: ContextPtr, tokens: &[i32]) -> Result<(), RuntimeError> {
        let ret = unsafe { (self.decode)(ctx, tokens.as_ptr(), tokens.len() as c_int) };
        if ret == 0 {
            Ok(())
        } else {
            Err(RuntimeError::GenerateFailed {
                message: format!("decode step returned {ret}"),
            })
        }
    }

    /// Sample the next token from the logits of the last decoded position.
    ///
    /// Implements temperature + top-k + top-p entirely on the Rust side over
    /// the raw logits buffer `llama_get_logits_ith` returns; the native
    /// library's own sampler-chain API is not part of the minimal operation
    /// set this wrapper exposes.
    pub fn sample(
        &self,
        ctx: ContextPtr,
        n_vocab: usize,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        rng: &mut impl FnMut() -> f32,
    ) -> Result<i32, RuntimeError> {
        let ptr = unsafe { (self.get_logits_ith)(ctx, -1) };
        if ptr.is_null() {
            return Err(RuntimeError::GenerateFailed {
                message: "native library returned null logits".into(),
            });
        }
        let logits = unsafe { std::slice::from_raw_parts(ptr, n_vocab) };

        if temperature <= 0.0 {
            let (idx, _) = logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .expect("n_vocab > 0");
            return Ok(idx as i32);
        }

        let mut candidates: Vec<(usize, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i, l / temperature))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k = if top_k <= 0 {
            candidates.len()
        } else {
            (top_k as usize).min(candidates.len())
        };
        candidates.truncate(top_k);

        let max_logit = candidates[0].1;
        let mut probs: Vec<f32> = candidates
            .iter()
            .map(|(_, l)| (l - max_logit).exp())
            .collect();
        let sum: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= sum;
        }

        let mut cumulative = 0.0f32;
        let mut cutoff = probs.len();
        for (i, &p) in probs.iter().enumerate() {
            cumulative += p;
            if cumulative >= top_p {
                cutoff = i + 1;
                break;
            }
        }
        probs.truncate(cutoff);
        candidates.truncate(cutoff);
        let sum: f32 = probs.iter().sum();

        let draw = rng() * sum;
        let mut acc = 0.0f32;
        for (i, &p) in probs.iter().enumerate() {
            acc += p;
            if draw <= acc {
                return Ok(candidates[i].0 as i32);
            }
        }
        Ok(candidates.last().expect("non-empty").0 as i32)
    }

    pub fn token_to_piece(&self, vocab: VocabPtr, token: i32) -> Result<String, RuntimeError> {
        let mut buf = vec![0i8; 64];
        loop {
            let n = unsafe {
                (self.token_to_piece)(vocab, token, buf.as_mut_ptr(), buf.len() as c_int)
            };
            if n < 0 {
                buf.resize((-n) as usize, 0);
                continue;
            }
            let bytes: Vec<u8> = buf[..n as usize].iter().map(|&b| b as u8).collect();
            return String::from_utf8(bytes).map_err(|e| RuntimeError::GenerateFailed {
                message: format!("token produced invalid utf-8: {e}"),
            });
        }
    }

    pub fn is_eog(&self, vocab: VocabPtr, token: i32) -> bool {
        unsafe { (self.is_eog)(vocab, token) }
    }

    /// Clear the KV cache for `ctx`, so that the next decode starts from an
    /// empty context rather than continuing a previous request's state.
    pub fn kv_cache_clear(&self, ctx: ContextPtr) {
        unsafe { (self.kv_cache_clear)(ctx) }
    }
}
