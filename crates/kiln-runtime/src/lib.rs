//! Dynamic bindings to a native LLM runtime, scoped to the minimal
//! operation set the serving core needs: load a model, create a context,
//! run a generation step, read stats, free resources.
//!
//! # Usage
//!
//! ```rust,no_run
//! use kiln_runtime::{ContextParams, Model, SamplingParams};
//! use std::path::Path;
//!
//! let model = Model::load(Path::new("/usr/lib/libllama.so"), "/models/model.gguf", 0).unwrap();
//! let mut handle = model.new_handle(ContextParams::default()).unwrap();
//!
//! let cancelled = || false;
//! for step in handle.generate("Hello, world!", SamplingParams::default(), &cancelled).unwrap() {
//!     let step = step.unwrap();
//!     print!("{}", step.text);
//!     if step.done {
//!         break;
//!     }
//! }
//! ```

mod context_params;
mod error;
mod ffi;
mod handle;
mod model;
mod model_params;

pub use context_params::ContextParams;
pub use error::RuntimeError;
pub use handle::{Generation, GenerationStep, Handle, RuntimeStats, SamplingParams};
pub use model::Model;
pub use model_params::ModelParams;
