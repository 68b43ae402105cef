//! Capability-driven variant selection.
//!
//! Per the Design Notes ("Dynamically selected kernel variants... selection
//! is a pure function returning the tag. No runtime dispatch table
//! indirection in the hot loop."), every selector here is a free function
//! from a small context record to a `&'static str` variant name — no object,
//! no trait, nothing to look up at call time beyond the registry itself.

use crate::gpu::dtype::DType;
use crate::gpu::DeviceCapabilities;

#[derive(Copy, Clone, Debug)]
pub struct MatmulContext {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub a_dtype: DType,
    pub b_dtype: DType,
    pub output_dtype: DType,
    pub prefer_f16: bool,
    pub use_vec4: bool,
}

pub fn select_matmul(ctx: &MatmulContext, caps: &DeviceCapabilities) -> &'static str {
    // Decode (M=1) generally wins from dequant-then-matmul over a fused
    // quantized kernel on consumer GPUs; fused paths
    // are reserved for prefill-shaped calls or explicit hints handled by the
    // caller before reaching this function (the caller passes a dequantized
    // f32/f16 `b_dtype` for decode unless a manifest hint overrides it).
    if ctx.b_dtype == DType::Q4K && caps.has_subgroups {
        return if ctx.m == 1 && ctx.n > 4096 {
            "q4_fused_multicol"
        } else if ctx.m == 1 {
            "q4_fused"
        } else {
            "q4_fused_batched"
        };
    }

    if ctx.a_dtype == DType::F16
        && ctx.b_dtype == DType::F16
        && ctx.output_dtype == DType::F16
        && caps.has_f16
    {
        return if ctx.use_vec4 { "f16_vec4" } else { "f16" };
    }

    if ctx.b_dtype == DType::F16 && caps.has_f16 {
        return "f16w_f32a";
    }

    if ctx.m == 1 && ctx.b_dtype == DType::F16 {
        return if !caps.has_subgroups {
            "gemv"
        } else if ctx.n > 8192 {
            "gemv_subgroup_multicol"
        } else if ctx.use_vec4 {
            "gemv_subgroup_vec4"
        } else {
            "gemv_subgroup"
        };
    }

    let _ = ctx.prefer_f16;
    "tiled_f32"
}

#[derive(Copy, Clone, Debug)]
pub struct AttentionContext {
    pub seq_len: u32,
    pub kv_len: u32,
    pub num_heads: u32,
    pub head_dim: u32,
    pub kv_dtype: DType,
    pub shared_memory_limit: u32,
}

const PREFILL_LARGE_SHARED_MEMORY: u32 = 49_152;

pub fn select_attention(ctx: &AttentionContext, caps: &DeviceCapabilities) -> &'static str {
    let f16_kv = ctx.kv_dtype == DType::F16;
    if ctx.seq_len == 1 {
        if caps.has_subgroups {
            return "decode_subgroup";
        }
        if ctx.head_dim <= 256 && ctx.kv_len <= 2048 {
            return if f16_kv {
                "decode_chunked_f16kv"
            } else {
                "decode_chunked"
            };
        }
        return match (ctx.head_dim <= 64, f16_kv) {
            (true, true) => "decode_small_f16kv",
            (true, false) => "decode_small",
            (false, true) => "decode_streaming_f16kv",
            (false, false) => "decode_streaming",
        };
    }

    // Prefill.
    if ctx.head_dim <= 64 && ctx.shared_memory_limit >= PREFILL_LARGE_SHARED_MEMORY {
        return "prefill";
    }
    let tile_bytes = ctx.head_dim as u64 * if f16_kv { 2 } else { 4 };
    if tile_bytes <= ctx.shared_memory_limit as u64 {
        return "prefill_small";
    }
    "prefill_streaming"
}

#[derive(Copy, Clone, Debug)]
pub struct DequantContext {
    pub format: DType,
    pub output_dtype: DType,
    pub element_count: u64,
}

pub fn select_dequant(ctx: &DequantContext, caps: &DeviceCapabilities) -> &'static str {
    let vec4_eligible = ctx.element_count % 4 == 0;
    match (ctx.format, vec4_eligible, caps.has_subgroups) {
        (DType::Q4K, true, true) => "q4k_vec4_subgroup",
        (DType::Q4K, true, false) => "q4k_vec4",
        (DType::Q4K, false, true) => "q4k_subgroup",
        (DType::Q4K, false, false) => "q4k_scalar",
        (DType::Q6K, true, _) => "q6k_vec4",
        (DType::Q6K, false, _) => "q6k_scalar",
        (DType::Q8_0, true, _) => "q8_0_vec4",
        (DType::Q8_0, false, _) => "q8_0_scalar",
        (DType::MxFp4, true, _) => "mxfp4_vec4",
        (DType::MxFp4, false, _) => "mxfp4_scalar",
        (other, _, _) => {
            debug_assert!(false, "select_dequant called with non-quantized dtype {other:?}");
            "q4k_scalar"
        }
    }
}

pub fn select_rmsnorm(hidden_size: u32, fuse_residual: bool) -> &'static str {
    if hidden_size <= 256 {
        "small"
    } else if fuse_residual {
        "residual"
    } else {
        "default"
    }
}

pub fn select_fused_matmul_rmsnorm(n: u32) -> Option<&'static str> {
    if n <= 256 {
        Some("small")
    } else if n <= 4096 {
        Some("medium")
    } else {
        None // caller falls back to a separate matmul + rmsnorm dispatch
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FfnContext {
    pub intermediate_size: u32,
    pub batch: u32,
    pub dtype: DType,
}

const SMALL_INTERMEDIATE: u32 = 8192;

pub fn select_ffn(ctx: &FfnContext, caps: &DeviceCapabilities) -> &'static str {
    if ctx.intermediate_size <= SMALL_INTERMEDIATE && ctx.batch == 1 {
        return "multi";
    }
    if ctx.batch > 1 {
        return "batched";
    }
    if ctx.dtype == DType::F16 && caps.has_f16 {
        return "f16";
    }
    "default"
}

pub fn select_softmax(inner_size: u32) -> &'static str {
    if inner_size <= 256 {
        "small"
    } else {
        "online"
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SampleContext {
    pub temperature: f32,
    pub top_k: u32,
    pub vocab_size: u32,
}

const SMALL_TOP_K: u32 = 64;
const LARGE_VOCAB: u32 = 65_536;

pub fn select_sample(ctx: &SampleContext) -> &'static str {
    if ctx.temperature == 0.0 {
        return if ctx.vocab_size > LARGE_VOCAB {
            "argmax_reduce"
        } else {
            "argmax"
        };
    }
    if ctx.top_k > 0 && ctx.top_k <= SMALL_TOP_K {
        return "single_pass";
    }
    "softmax_and_sample"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(f16: bool, subgroups: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            has_f16: f16,
            has_subgroups: subgroups,
            has_timestamp_query: false,
            max_compute_workgroups_per_dimension: 65535,
            max_compute_workgroup_storage_size: 32768,
            storage_alignment: 256,
        }
    }

    #[test]
    fn matmul_prefers_fused_q4k_when_subgroups_available() {
        let ctx = MatmulContext {
            m: 1,
            n: 16384,
            k: 4096,
            a_dtype: DType::F32,
            b_dtype: DType::Q4K,
            output_dtype: DType::F32,
            prefer_f16: false,
            use_vec4: false,
        };
        assert_eq!(select_matmul(&ctx, &caps(false, true)), "q4_fused_multicol");
    }

    #[test]
    fn matmul_falls_back_to_gemv_without_subgroups() {
        let ctx = MatmulContext {
            m: 1,
            n: 512,
            k: 4096,
            a_dtype: DType::F32,
            b_dtype: DType::F16,
            output_dtype: DType::F32,
            prefer_f16: false,
            use_vec4: false,
        };
        assert_eq!(select_matmul(&ctx, &caps(false, false)), "gemv");
    }

    #[test]
    fn matmul_pure_f32_path_has_no_capability_requirement() {
        let ctx = MatmulContext {
            m: 8,
            n: 512,
            k: 4096,
            a_dtype: DType::F32,
            b_dtype: DType::F32,
            output_dtype: DType::F32,
            prefer_f16: false,
            use_vec4: false,
        };
        assert_eq!(select_matmul(&ctx, &caps(false, false)), "tiled_f32");
    }

    #[test]
    fn attention_decode_prefers_subgroup() {
        let ctx = AttentionContext {
            seq_len: 1,
            kv_len: 128,
            num_heads: 32,
            head_dim: 128,
            kv_dtype: DType::F16,
            shared_memory_limit: 32768,
        };
        assert_eq!(select_attention(&ctx, &caps(true, true)), "decode_subgroup");
        assert_eq!(
            select_attention(&ctx, &caps(true, false)),
            "decode_chunked_f16kv"
        );
    }

    #[test]
    fn attention_prefill_picks_large_tile_when_shared_memory_suffices() {
        let ctx = AttentionContext {
            seq_len: 128,
            kv_len: 128,
            num_heads: 32,
            head_dim: 64,
            kv_dtype: DType::F32,
            shared_memory_limit: 49_152,
        };
        assert_eq!(select_attention(&ctx, &caps(false, false)), "prefill");
    }

    #[test]
    fn sample_argmax_for_zero_temperature() {
        let ctx = SampleContext {
            temperature: 0.0,
            top_k: 0,
            vocab_size: 128_000,
        };
        assert_eq!(select_sample(&ctx), "argmax_reduce");
    }

    #[test]
    fn sample_single_pass_top_k_for_small_k() {
        let ctx = SampleContext {
            temperature: 0.8,
            top_k: 40,
            vocab_size: 32_000,
        };
        assert_eq!(select_sample(&ctx), "single_pass");
    }

    #[test]
    fn softmax_small_vs_online() {
        assert_eq!(select_softmax(128), "small");
        assert_eq!(select_softmax(4096), "online");
    }

    #[test]
    fn dequant_picks_vec4_subgroup_variant_when_both_available() {
        let ctx = DequantContext {
            format: DType::Q4K,
            output_dtype: DType::F32,
            element_count: 1024,
        };
        assert_eq!(select_dequant(&ctx, &caps(false, true)), "q4k_vec4_subgroup");
    }

    #[test]
    fn dequant_falls_back_to_scalar_without_vec4_or_subgroups() {
        let ctx = DequantContext {
            format: DType::Q6K,
            output_dtype: DType::F32,
            element_count: 257,
        };
        assert_eq!(select_dequant(&ctx, &caps(false, false)), "q6k_scalar");
    }

    #[test]
    fn dequant_picks_vec4_for_mxfp4_regardless_of_subgroups() {
        let ctx = DequantContext {
            format: DType::MxFp4,
            output_dtype: DType::F16,
            element_count: 512,
        };
        assert_eq!(select_dequant(&ctx, &caps(false, false)), "mxfp4_vec4");
        assert_eq!(select_dequant(&ctx, &caps(false, true)), "mxfp4_vec4");
    }
}
