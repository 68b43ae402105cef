//! Configuration surface consumed by the core. Resolving these from
//! presets or files is an external concern; what lives here is the typed
//! shape, its field defaults, and range validation.

use serde::{Deserialize, Serialize};

use crate::error::{DopplerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Silu,
    Gelu,
    Swiglu,
    Geglu,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Silu
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RopeScaling {
    Linear,
    Dynamic,
    Yarn,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AttentionConfig {
    pub attention_kernel: Option<String>,
    pub sliding_window: Option<u32>,
    pub attn_logit_softcapping: Option<f32>,
    pub query_pre_attn_scalar: Option<f32>,
}

impl AttentionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(cap) = self.attn_logit_softcapping {
            if !(cap > 0.0) {
                return Err(DopplerError::Configuration(
                    "attn_logit_softcapping must be positive when set".into(),
                ));
            }
        }
        if let Some(w) = self.sliding_window {
            if w == 0 {
                return Err(DopplerError::Configuration(
                    "sliding_window must be non-zero when set".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FfnConfig {
    #[serde(default)]
    pub activation: Activation,
    pub gated: bool,
    pub fused_gate_up: bool,
    pub swiglu_limit: Option<f32>,
}

impl Default for FfnConfig {
    fn default() -> Self {
        FfnConfig {
            activation: Activation::Swiglu,
            gated: true,
            fused_gate_up: false,
            swiglu_limit: None,
        }
    }
}

impl FfnConfig {
    pub fn validate(&self) -> Result<()> {
        if matches!(self.activation, Activation::Silu | Activation::Gelu) && self.gated {
            return Err(DopplerError::Configuration(
                "gated=true requires a gated activation (swiglu/geglu)".into(),
            ));
        }
        if let Some(limit) = self.swiglu_limit {
            if !(limit > 0.0) {
                return Err(DopplerError::Configuration(
                    "swiglu_limit must be positive when set".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizationConfig {
    pub rms_norm_eps: f32,
    pub rms_norm_weight_offset: bool,
    pub post_attention_norm: bool,
    pub pre_feedforward_norm: bool,
    pub post_feedforward_norm: bool,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        NormalizationConfig {
            rms_norm_eps: 1e-5,
            rms_norm_weight_offset: false,
            post_attention_norm: false,
            pre_feedforward_norm: false,
            post_feedforward_norm: false,
        }
    }
}

impl NormalizationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rms_norm_eps > 0.0) {
            return Err(DopplerError::Configuration("rms_norm_eps must be > 0.0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    pub final_logit_softcapping: Option<f32>,
    pub tie_word_embeddings: bool,
}

impl OutputConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(cap) = self.final_logit_softcapping {
            if !(cap > 0.0) {
                return Err(DopplerError::Configuration(
                    "final_logit_softcapping must be positive when set".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RopeConfig {
    pub theta: f32,
    pub local_theta: Option<f32>,
    pub scaling_type: Option<RopeScaling>,
    pub scaling_factor: f32,
}

impl Default for RopeConfig {
    fn default() -> Self {
        RopeConfig {
            theta: 10_000.0,
            local_theta: None,
            scaling_type: None,
            scaling_factor: 1.0,
        }
    }
}

impl RopeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.theta > 0.0) {
            return Err(DopplerError::Configuration("rope theta must be > 0.0".into()));
        }
        if !(self.scaling_factor > 0.0) {
            return Err(DopplerError::Configuration(
                "rope scaling_factor must be > 0.0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: 0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.temperature < 0.0 {
            return Err(DopplerError::Configuration("temperature must be >= 0.0".into()));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(DopplerError::Configuration("top_p must be in [0.0, 1.0]".into()));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(DopplerError::Configuration(
                "repetition_penalty must be > 0.0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchingConfig {
    pub max_tokens: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        BatchingConfig { max_tokens: 4096 }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(DopplerError::Configuration("max_tokens must be non-zero".into()));
        }
        Ok(())
    }
}

/// The `inference.*` configuration groups, gathered under one
/// immutable root. Resolution from presets/files happens outside this crate;
/// `validate()` is the boundary where malformed values turn into
/// `DopplerError::Configuration` before any GPU work starts.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InferenceConfig {
    pub attention: AttentionConfig,
    pub ffn: FfnConfig,
    pub normalization: NormalizationConfig,
    pub output: OutputConfig,
    pub rope: RopeConfig,
    pub sampling: SamplingConfig,
    pub batching: BatchingConfig,
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        self.attention.validate()?;
        self.ffn.validate()?;
        self.normalization.validate()?;
        self.output.validate()?;
        self.rope.validate()?;
        self.sampling.validate()?;
        self.batching.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        InferenceConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_top_p_out_of_range() {
        let mut cfg = InferenceConfig::default();
        cfg.sampling.top_p = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_softcap() {
        let mut cfg = InferenceConfig::default();
        cfg.attention.attn_logit_softcapping = Some(-1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_gated_flag_on_ungated_activation() {
        let mut cfg = InferenceConfig::default();
        cfg.ffn.activation = Activation::Silu;
        cfg.ffn.gated = true;
        assert!(cfg.validate().is_err());
    }
}
