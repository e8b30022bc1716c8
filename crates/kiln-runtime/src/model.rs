use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use crate::context_params::ContextParams;
use crate::error::RuntimeError;
use crate::ffi::Lib;
use crate::handle::Handle;
use crate::model_params::ModelParams;

/// A loaded set of model weights, shared read-only across every worker's
/// [`Handle`].
///
/// One `Model` is created once at pool initialization; each worker then
/// creates its own [`Handle`] (and therefore its own inference context)
/// against it via [`Model::new_handle`]. Mirrors how the weights (`Arc<..>`)
/// are shared while each worker owns an exclusive context.
pub struct Model {
    pub(crate) lib: Arc<Lib>,
    pub(crate) ptr: *mut c_void,
    pub(crate) vocab: *const c_void,
    pub(crate) n_vocab: usize,
    path: String,
    gpu_layers: i32,
}

// SAFETY: `ptr`/`vocab` are read-only once loaded (no context is attached to
// a `Model` itself); the native library guarantees read-only model access is
// safe to call concurrently from multiple contexts/threads.
unsafe impl Send for Model {}
unsafe impl Sync for Model {}

impl Drop for Model {
    fn drop(&mut self) {
        self.lib.free_model(self.ptr);
        self.lib.backend_free();
    }
}

impl Model {
    /// Load the native runtime library from `library_path`, initialize its
    /// backend and load the model at `model_path`.
    pub fn load(library_path: &Path, model_path: &str, gpu_layers: i32) -> Result<Arc<Self>, RuntimeError> {
        let lib = Arc::new(Lib::load(library_path)?);
        lib.backend_init();

        let params = ModelParams::new().n_gpu_layers(gpu_layers).to_c_params();
        let ptr = lib.load_model(model_path, params)?;
        let vocab = lib.vocab(ptr);
        let n_vocab = lib.vocab_n_tokens(vocab).max(0) as usize;

        Ok(Arc::new(Self {
            lib,
            ptr,
            vocab,
            n_vocab,
            path: model_path.to_owned(),
            gpu_layers,
        }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn n_vocab(&self) -> usize {
        self.n_vocab
    }

    /// Create a new exclusive inference context against this model's
    /// weights, for one worker's sole use.
    pub fn new_handle(self: &Arc<Self>, context: ContextParams) -> Result<Handle, RuntimeError> {
        let ctx = self.lib.new_context(self.ptr, context.to_c_params())?;
        let gpu_layers = self.gpu_layers;
        let mut handle = Handle::new(Arc::clone(self), ctx);
        handle.set_gpu_layers(gpu_layers);
        Ok(handle)
    }
}
