use crate::ffi::CModelParams;

/// Parameters for loading a model into the native runtime.
#[derive(Clone, Copy)]
pub struct ModelParams {
    /// Number of layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: i32,
    /// Load only the vocabulary, not the weights.
    pub vocab_only: bool,
    /// Use memory-mapped I/O if available.
    pub use_mmap: bool,
    /// Lock model weights in RAM (prevent swapping).
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            vocab_only: false,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_gpu_layers(mut self, n: i32) -> Self {
        self.n_gpu_layers = n;
        self
    }

    pub fn vocab_only(mut self, v: bool) -> Self {
        self.vocab_only = v;
        self
    }

    pub fn use_mmap(mut self, v: bool) -> Self {
        self.use_mmap = v;
        self
    }

    pub fn use_mlock(mut self, v: bool) -> Self {
        self.use_mlock = v;
        self
    }

    pub(crate) fn to_c_params(&self) -> CModelParams {
        CModelParams {
            n_gpu_layers: self.n_gpu_layers,
            use_mmap: self.use_mmap,
            use_mlock: self.use_mlock,
            vocab_only: self.vocab_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_cpu_only_mmap_on() {
        let p = ModelParams::default();
        assert_eq!(p.n_gpu_layers, 0);
        assert!(p.use_mmap);
        assert!(!p.use_mlock);
    }

    #[test]
    fn builder_overrides_fields() {
        let p = ModelParams::new().n_gpu_layers(32).use_mlock(true);
        assert_eq!(p.n_gpu_layers, 32);
        assert!(p.use_mlock);
    }
}
