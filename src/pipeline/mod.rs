//! Inference pipeline: configuration, collaborator traits, KV cache,
//! sampling, per-layer and whole-model forward passes, and the
//! prefill/decode driver.

pub mod activation;
pub mod collaborators;
pub mod config;
pub mod driver;
pub mod ffn;
pub mod kv_cache;
pub mod layer;
pub mod model;
pub mod moe;
pub mod rope;
pub mod sampling;

pub use collaborators::{
    ExpertLoader, LayerType, LayerWeights, LoraAdapter, ModelManifest, SpecialTokens, Tokenizer,
    WeightLoader,
};
pub use config::InferenceConfig;
pub use driver::{generate, GenerationRequest, GenerationResult};
pub use kv_cache::KvCache;
pub use layer::LayerDims;
pub use model::Model;
pub use moe::Routing;
pub use sampling::sample;
