//! DOPPLER core: a browser-resident inference runtime for decoder-only
//! transformer language models on a WebGPU-class device.
//!
//! Five subsystems compose the engine: the GPU resource substrate
//! ([`gpu`]), the kernel library and variant selector ([`kernel`]),
//! on-device quantization codecs ([`quant`]), the inference pipeline
//! ([`pipeline`]), and the VLIW-style micro-scheduler ([`scheduler`]).
//! [`error`] carries the typed error surface shared across all of them.

pub mod error;
pub mod gpu;
pub mod kernel;
pub mod pipeline;
pub mod quant;
pub mod scheduler;

pub use error::{DopplerError, ErrorKind, Result};
pub use gpu::GpuContext;
pub use pipeline::{generate, GenerationRequest, GenerationResult, InferenceConfig, Model};
