use crate::ffi::CContextParams;

/// Parameters for creating an inference context against a loaded model.
#[derive(Clone, Copy)]
pub struct ContextParams {
    /// Context window size in tokens (0 = use model default).
    pub n_ctx: u32,
    /// Maximum batch size for decoding.
    pub n_batch: u32,
    /// Number of threads used for generation.
    pub n_threads: i32,
    /// Number of threads used for batch/prompt processing.
    pub n_threads_batch: i32,
    /// Offload the KV cache to GPU.
    pub offload_kqv: bool,
    /// Enable flash attention.
    pub flash_attn: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_batch: 512,
            n_threads: 4,
            n_threads_batch: 4,
            offload_kqv: true,
            flash_attn: false,
        }
    }
}

impl ContextParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_ctx(mut self, v: u32) -> Self {
        self.n_ctx = v;
        self
    }

    pub fn n_batch(mut self, v: u32) -> Self {
        self.n_batch = v;
        self
    }

    pub fn n_threads(mut self, v: i32) -> Self {
        self.n_threads = v;
        self
    }

    pub fn n_threads_batch(mut self, v: i32) -> Self {
        self.n_threads_batch = v;
        self
    }

    pub fn offload_kqv(mut self, v: bool) -> Self {
        self.offload_kqv = v;
        self
    }

    pub fn flash_attn(mut self, v: bool) -> Self {
        self.flash_attn = v;
        self
    }

    pub(crate) fn to_c_params(&self) -> CContextParams {
        CContextParams {
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
            n_threads: self.n_threads,
            n_threads_batch: self.n_threads_batch,
            offload_kqv: self.offload_kqv,
            flash_attn: self.flash_attn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_size_is_nonzero() {
        assert_eq!(ContextParams::default().n_ctx, 4096);
    }

    #[test]
    fn builder_overrides_context_size() {
        let p = ContextParams::new().n_ctx(8192).n_threads(8);
        assert_eq!(p.n_ctx, 8192);
        assert_eq!(p.n_threads, 8);
    }
}
