//! External collaborator traits: tokenizer, model manifest, weight
//! loader, expert loader. The pipeline depends on these only through their
//! trait boundary — concrete implementations (disk formats, HTTP fetch,
//! tokenizer algorithms) live outside this crate.

use crate::error::Result;
use crate::gpu::dtype::{DType, Shape};
use crate::gpu::dtype::Tensor;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialTokens {
    pub pad: Option<u32>,
    pub bos: Option<u32>,
    pub eos: Option<u32>,
    pub unk: Option<u32>,
}

/// Token ↔ text boundary. The pipeline only ever needs the id space and the
/// stop-token set; the encoding algorithm (BPE, unigram, byte-fallback) is
/// entirely the implementor's concern.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, token_ids: &[u32], skip_special: bool, trim: bool) -> String;
    fn special_tokens(&self) -> SpecialTokens;
    fn stop_tokens(&self) -> Vec<u32> {
        self.special_tokens().eos.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    FullAttention,
    SlidingAttention,
}

/// Architecture parameters and per-tensor layout, as declared by whatever
/// manifest format the model was converted from.
pub trait ModelManifest {
    fn num_layers(&self) -> u32;
    fn hidden_size(&self) -> u32;
    fn num_attention_heads(&self) -> u32;
    fn num_key_value_heads(&self) -> u32;
    fn head_dim(&self) -> u32;
    fn vocab_size(&self) -> u32;
    fn layer_type(&self, layer_idx: u32) -> LayerType;
    fn scale_embeddings(&self) -> bool;
    fn quantization_format(&self) -> Option<DType>;
    fn tensor_shape(&self, name: &str) -> Option<Shape>;
    fn tokenizer_ref(&self) -> &str;
    fn num_experts(&self) -> u32 {
        0
    }
    fn experts_per_token(&self) -> u32 {
        0
    }
}

pub struct LayerWeights {
    pub q_proj: Tensor,
    pub k_proj: Tensor,
    pub v_proj: Tensor,
    pub o_proj: Tensor,
    pub pre_attn_norm: Tensor,
    pub post_attn_norm: Option<Tensor>,
    pub pre_ffn_norm: Tensor,
    pub post_ffn_norm: Option<Tensor>,
    pub gate_proj: Option<Tensor>,
    pub up_proj: Tensor,
    pub down_proj: Tensor,
    pub router: Option<Tensor>,
    pub lora: Option<LoraAdapter>,
}

pub struct LoraAdapter {
    pub a: Tensor,
    pub b: Tensor,
    pub scale: f32,
}

/// Reads weight shards on demand and returns handles organized by layer and
/// module, applying whichever row-major/column-major layout the manifest
/// declares and populating the buffer-dtype registry on upload.
pub trait WeightLoader {
    fn load_embedding(&mut self) -> Result<Tensor>;
    fn load_layer(&mut self, layer_idx: u32) -> Result<LayerWeights>;
    fn load_lm_head(&mut self) -> Result<Option<Tensor>>;
    fn load_final_norm(&mut self) -> Result<Tensor>;
}

/// MoE expert residency. `ensure_expert_loaded` may perform disk or network
/// I/O; per the Design Notes, that happens between forward passes, never on
/// the scheduler's ready-set computation path.
pub trait ExpertLoader {
    fn ensure_expert_loaded(&mut self, layer_idx: u32, expert_idx: u32) -> Result<()>;
    fn gather_tokens(&self, hidden: &Tensor, token_indices: &[u32], hidden_size: u32) -> Result<Tensor>;
    /// Weights for an expert already made resident by `ensure_expert_loaded`.
    fn expert_weights(&self, layer_idx: u32, expert_idx: u32) -> Result<&LayerWeights>;
}
