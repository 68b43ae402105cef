//! One transformer layer's forward pass: pre-attention norm, QKV projection,
//! RoPE, KV-cache write, attention, output projection (with optional LoRA),
//! residual add, pre-FFN norm, dense or MoE FFN, residual add.

use std::sync::Arc;

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::dtype::{DType, Tensor};
use crate::gpu::pool::{BufferPool, PooledBuffer};
use crate::gpu::recorder::CommandRecorder;
use crate::gpu::uniform::UniformCache;
use crate::kernel::dispatch::{dispatch_kernel, Binding};
use crate::kernel::registry::{KernelRegistry, Operation};
use crate::kernel::selector::{select_attention, select_matmul, select_rmsnorm, AttentionContext, MatmulContext};
use crate::pipeline::collaborators::{ExpertLoader, LayerType, LayerWeights};
use crate::pipeline::config::{AttentionConfig, FfnConfig, NormalizationConfig, RopeConfig};
use crate::pipeline::ffn::forward_dense_ffn;
use crate::pipeline::kv_cache::KvCache;
use crate::pipeline::moe::{forward_moe_ffn, Routing};
use crate::pipeline::rope::{effective_theta, position_scale};

/// Static shape parameters for one layer's forward call. Grouped into one
/// record so `forward_layer` doesn't carry a dozen loose `u32` arguments.
#[derive(Copy, Clone, Debug)]
pub struct LayerDims {
    pub layer_idx: u32,
    pub num_tokens: u32,
    pub position_offset: u32,
    pub hidden_size: u32,
    pub intermediate_size: u32,
    pub num_attention_heads: u32,
    pub num_key_value_heads: u32,
    pub head_dim: u32,
}

/// Inputs needed only for MoE layers: the per-expert weight table, the
/// lazy-loading collaborator, and the routing decision for this batch.
/// `routings` must already be known by the time `forward_layer` runs — the
/// router-logits matmul and its CPU-side top-k softmax happen before this
/// call, via an extra readback suspension point documented in DESIGN.md as an
/// exception specific to MoE models.
pub struct MoeInputs<'a> {
    pub expert_loader: &'a mut dyn ExpertLoader,
    pub num_experts: u32,
    pub routings: &'a [Routing],
}

fn uniform4(pool: &BufferPool, device: &Device, recorder: &mut CommandRecorder<'_>, label: &str, words: &[u32]) -> Result<Arc<PooledBuffer>> {
    let cache = UniformCache::new(pool);
    let words = words.to_vec();
    cache.write_uniforms(device, Some(recorder), label, |buf| {
        for (i, w) in words.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn matmul(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    x: &Tensor,
    weight: &Tensor,
    m: u32,
    n: u32,
    k: u32,
    label: &str,
) -> Result<Tensor> {
    let ctx = MatmulContext {
        m,
        n,
        k,
        a_dtype: x.dtype,
        b_dtype: weight.dtype,
        output_dtype: DType::F32,
        prefer_f16: false,
        use_vec4: n % 4 == 0,
    };
    let variant = select_matmul(&ctx, &device.capabilities);
    let out_buf = pool.acquire(device, m as u64 * n as u64 * 4, wgpu::BufferUsages::STORAGE, label)?;
    let uniform = uniform4(pool, device, recorder, label, &[m, n, k])?;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::Matmul,
        variant,
        &[
            Binding::Storage(&x.buffer),
            Binding::Storage(&weight.buffer),
            Binding::Storage(&out_buf),
            Binding::Uniform(&uniform),
        ],
        m as u64 * n as u64,
        label,
    )?;
    Ok(Tensor::new(out_buf, DType::F32, [m as usize, n as usize], false, label.to_string()))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn rms_norm(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    x: &Tensor,
    weight: &Tensor,
    num_tokens: u32,
    hidden_size: u32,
    config: &NormalizationConfig,
    label: &str,
) -> Result<Tensor> {
    let variant = select_rmsnorm(hidden_size, false);
    let out_buf = pool.acquire(device, num_tokens as u64 * hidden_size as u64 * 4, wgpu::BufferUsages::STORAGE, label)?;
    let cache = UniformCache::new(pool);
    let eps = config.rms_norm_eps;
    let offset = if config.rms_norm_weight_offset { 1u32 } else { 0u32 };
    let uniform = cache.write_uniforms(device, Some(recorder), label, |buf| {
        buf[0..4].copy_from_slice(&hidden_size.to_le_bytes());
        buf[4..8].copy_from_slice(&eps.to_le_bytes());
        buf[8..12].copy_from_slice(&offset.to_le_bytes());
    })?;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::RmsNorm,
        variant,
        &[
            Binding::Storage(&x.buffer),
            Binding::Storage(&weight.buffer),
            Binding::Storage(&out_buf),
            Binding::Uniform(&uniform),
        ],
        num_tokens as u64 * hidden_size as u64,
        label,
    )?;
    Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, hidden_size as usize], false, label.to_string()))
}

#[allow(clippy::too_many_arguments)]
fn residual_add(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    a: &Tensor,
    b: &Tensor,
    num_tokens: u32,
    hidden_size: u32,
    label: &str,
) -> Result<Tensor> {
    let out_buf = pool.acquire(device, num_tokens as u64 * hidden_size as u64 * 4, wgpu::BufferUsages::STORAGE, label)?;
    let uniform = uniform4(pool, device, recorder, label, &[num_tokens * hidden_size])?;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::Residual,
        "add",
        &[
            Binding::Storage(&a.buffer),
            Binding::Storage(&b.buffer),
            Binding::Storage(&out_buf),
            Binding::Uniform(&uniform),
        ],
        num_tokens as u64 * hidden_size as u64,
        label,
    )?;
    Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, hidden_size as usize], false, label.to_string()))
}

/// Applies RoPE to `q` and `k` in place, using the layer's effective theta
/// and position scale (local theta for sliding layers, linear/dynamic/yarn
/// scaling per the model's rope config).
#[allow(clippy::too_many_arguments)]
fn apply_rope(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    q: &Tensor,
    k: &Tensor,
    dims: LayerDims,
    layer_type: LayerType,
    rope: &RopeConfig,
) -> Result<()> {
    let theta = effective_theta(rope, layer_type);
    let scale = position_scale(rope);
    let cache = UniformCache::new(pool);
    let position_offset = dims.position_offset;
    let head_dim = dims.head_dim;
    let uniform = cache.write_uniforms(device, Some(recorder), "rope_uniform", |buf| {
        buf[0..4].copy_from_slice(&theta.to_le_bytes());
        buf[4..8].copy_from_slice(&scale.to_le_bytes());
        buf[8..12].copy_from_slice(&position_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&head_dim.to_le_bytes());
    })?;
    let q_elems = dims.num_tokens as u64 * dims.num_attention_heads as u64 * dims.head_dim as u64;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::Rope,
        "apply_qk",
        &[Binding::Storage(&q.buffer), Binding::Storage(&k.buffer), Binding::Uniform(&uniform)],
        q_elems,
        "rope_apply",
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_attention(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    q: &Tensor,
    kv_cache: &KvCache,
    dims: LayerDims,
    layer_type: LayerType,
    attention: &AttentionConfig,
) -> Result<Tensor> {
    let kv_len = kv_cache.effective_kv_len(layer_type);
    let ctx = AttentionContext {
        seq_len: dims.num_tokens,
        kv_len,
        num_heads: dims.num_attention_heads,
        head_dim: dims.head_dim,
        kv_dtype: kv_cache.k.dtype,
        shared_memory_limit: device.capabilities.max_compute_workgroup_storage_size,
    };
    let variant = select_attention(&ctx, &device.capabilities);
    let default_scale = 1.0 / (dims.head_dim as f32).sqrt();
    let scale = attention.query_pre_attn_scalar.unwrap_or(default_scale);
    let softcap = attention.attn_logit_softcapping.unwrap_or(0.0);
    let sliding_window = attention.sliding_window.unwrap_or(0);

    let out_buf = pool.acquire(
        device,
        dims.num_tokens as u64 * dims.num_attention_heads as u64 * dims.head_dim as u64 * 4,
        wgpu::BufferUsages::STORAGE,
        "attention_output",
    )?;
    let cache = UniformCache::new(pool);
    let uniform = cache.write_uniforms(device, Some(recorder), "attention_uniform", |buf| {
        buf[0..4].copy_from_slice(&dims.num_tokens.to_le_bytes());
        buf[4..8].copy_from_slice(&kv_len.to_le_bytes());
        buf[8..12].copy_from_slice(&dims.num_attention_heads.to_le_bytes());
        buf[12..16].copy_from_slice(&dims.num_key_value_heads.to_le_bytes());
        buf[16..20].copy_from_slice(&dims.head_dim.to_le_bytes());
        buf[20..24].copy_from_slice(&scale.to_le_bytes());
        buf[24..28].copy_from_slice(&softcap.to_le_bytes());
        buf[28..32].copy_from_slice(&sliding_window.to_le_bytes());
    })?;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::Attention,
        variant,
        &[
            Binding::Storage(&q.buffer),
            Binding::Storage(&kv_cache.k.buffer),
            Binding::Storage(&kv_cache.v.buffer),
            Binding::Storage(&out_buf),
            Binding::Uniform(&uniform),
        ],
        dims.num_tokens as u64 * dims.num_attention_heads as u64 * dims.head_dim as u64,
        "attention",
    )?;
    Ok(Tensor::new(
        out_buf,
        DType::F32,
        [dims.num_tokens as usize, (dims.num_attention_heads * dims.head_dim) as usize],
        false,
        "attention_output",
    ))
}

/// `y = base + scale * (attn_out @ a) @ b`, the low-rank adjustment applied
/// to the output projection when a layer carries a LoRA adapter.
#[allow(clippy::too_many_arguments)]
fn apply_lora_to_output(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    attn_out: &Tensor,
    base_out: &Tensor,
    weights: &LayerWeights,
    num_tokens: u32,
    attn_width: u32,
    hidden_size: u32,
) -> Result<Tensor> {
    let Some(lora) = &weights.lora else {
        return Ok(base_out.clone());
    };
    let rank = lora.a.shape.as_slice().get(1).copied().unwrap_or(0) as u32;
    let low = matmul(device, registry, pool, recorder, attn_out, &lora.a, num_tokens, rank, attn_width, "lora_down")?;
    let adjustment = matmul(device, registry, pool, recorder, &low, &lora.b, num_tokens, hidden_size, rank, "lora_up")?;
    recorder.track_temporary(low.buffer.clone());

    let out_buf = pool.acquire(device, num_tokens as u64 * hidden_size as u64 * 4, wgpu::BufferUsages::STORAGE, "lora_combined")?;
    let cache = UniformCache::new(pool);
    let scale = lora.scale;
    let uniform = cache.write_uniforms(device, Some(recorder), "lora_scale_uniform", |buf| {
        buf[0..4].copy_from_slice(&scale.to_le_bytes());
    })?;
    dispatch_kernel(
        device,
        registry,
        recorder,
        Operation::Residual,
        "scaled_add",
        &[
            Binding::Storage(&base_out.buffer),
            Binding::Storage(&adjustment.buffer),
            Binding::Storage(&out_buf),
            Binding::Uniform(&uniform),
        ],
        num_tokens as u64 * hidden_size as u64,
        "lora_combine",
    )?;
    recorder.track_temporary(adjustment.buffer.clone());
    Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, hidden_size as usize], false, "lora_combined"))
}

/// Runs one full transformer layer over `x` (`[num_tokens, hidden_size]`),
/// returning the updated hidden state. `moe` is `None` for dense FFN layers.
#[allow(clippy::too_many_arguments)]
pub fn forward_layer(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    weights: &LayerWeights,
    kv_cache: &mut KvCache,
    layer_type: LayerType,
    dims: LayerDims,
    norm: &NormalizationConfig,
    attention: &AttentionConfig,
    rope: &RopeConfig,
    ffn: &FfnConfig,
    moe: Option<MoeInputs<'_>>,
    x: &Tensor,
) -> Result<Tensor> {
    let attn_width = dims.num_attention_heads * dims.head_dim;
    let kv_width = dims.num_key_value_heads * dims.head_dim;

    let normed = rms_norm(device, registry, pool, recorder, x, &weights.pre_attn_norm, dims.num_tokens, dims.hidden_size, norm, "pre_attn_norm")?;

    let q = matmul(device, registry, pool, recorder, &normed, &weights.q_proj, dims.num_tokens, attn_width, dims.hidden_size, "q_proj")?;
    let k = matmul(device, registry, pool, recorder, &normed, &weights.k_proj, dims.num_tokens, kv_width, dims.hidden_size, "k_proj")?;
    let v = matmul(device, registry, pool, recorder, &normed, &weights.v_proj, dims.num_tokens, kv_width, dims.hidden_size, "v_proj")?;
    recorder.track_temporary(normed.buffer.clone());

    apply_rope(device, registry, pool, recorder, &q, &k, dims, layer_type, rope)?;
    kv_cache.append(recorder, &k, &v, dims.num_tokens)?;
    recorder.track_temporary(k.buffer.clone());
    recorder.track_temporary(v.buffer.clone());

    let attn_out = apply_attention(device, registry, pool, recorder, &q, kv_cache, dims, layer_type, attention)?;
    recorder.track_temporary(q.buffer.clone());

    let projected = matmul(device, registry, pool, recorder, &attn_out, &weights.o_proj, dims.num_tokens, dims.hidden_size, attn_width, "o_proj")?;
    let projected = apply_lora_to_output(device, registry, pool, recorder, &attn_out, &projected, weights, dims.num_tokens, attn_width, dims.hidden_size)?;
    recorder.track_temporary(attn_out.buffer.clone());

    let projected = if norm.post_attention_norm {
        let weight = weights
            .post_attn_norm
            .as_ref()
            .expect("post_attention_norm requires a post-attention norm weight");
        rms_norm(device, registry, pool, recorder, &projected, weight, dims.num_tokens, dims.hidden_size, norm, "post_attn_norm")?
    } else {
        projected
    };

    let after_attn = residual_add(device, registry, pool, recorder, x, &projected, dims.num_tokens, dims.hidden_size, "attn_residual")?;
    recorder.track_temporary(projected.buffer.clone());

    // pre_ffn_norm always runs: the standard pre-norm placement. The
    // `pre_feedforward_norm` config flag distinguishes models that carry this
    // as a Gemma2-style extra sandwich norm from ones where it's the layer's
    // only pre-FFN norm; either way the weight is present and applied here.
    let ffn_input = rms_norm(device, registry, pool, recorder, &after_attn, &weights.pre_ffn_norm, dims.num_tokens, dims.hidden_size, norm, "pre_ffn_norm")?;

    let ffn_out = match moe {
        Some(moe) => {
            let combined = pool.acquire(device, dims.num_tokens as u64 * dims.hidden_size as u64 * 4, wgpu::BufferUsages::STORAGE, "moe_combined")?;
            let zero_uniform = uniform4(pool, device, recorder, "moe_zero_uniform", &[dims.num_tokens * dims.hidden_size])?;
            dispatch_kernel(
                device,
                registry,
                recorder,
                Operation::Residual,
                "zero",
                &[Binding::Storage(&combined), Binding::Uniform(&zero_uniform)],
                dims.num_tokens as u64 * dims.hidden_size as u64,
                "moe_zero_init",
            )?;
            let combined = Tensor::new(combined, DType::F32, [dims.num_tokens as usize, dims.hidden_size as usize], false, "moe_combined");

            let expert_results = forward_moe_ffn(
                device,
                registry,
                pool,
                recorder,
                moe.expert_loader,
                dims.layer_idx,
                moe.num_experts,
                ffn,
                &ffn_input,
                moe.routings,
                dims.hidden_size,
                dims.intermediate_size,
            )?;
            for (token_idx, expert_out, weight) in &expert_results {
                let idx_uniform = uniform4(pool, device, recorder, "scatter_add_uniform", &[*token_idx, dims.hidden_size, weight.to_bits()])?;
                dispatch_kernel(
                    device,
                    registry,
                    recorder,
                    Operation::ScatterAdd,
                    "weighted_row",
                    &[
                        Binding::Storage(&expert_out.buffer),
                        Binding::Storage(&combined.buffer),
                        Binding::Uniform(&idx_uniform),
                    ],
                    dims.hidden_size as u64,
                    "moe_scatter_add",
                )?;
                recorder.track_temporary(expert_out.buffer.clone());
            }
            combined
        }
        None => forward_dense_ffn(device, registry, pool, recorder, weights, ffn, &ffn_input, dims.num_tokens, dims.hidden_size, dims.intermediate_size)?,
    };
    recorder.track_temporary(ffn_input.buffer.clone());

    let ffn_out = if norm.post_feedforward_norm {
        let weight = weights
            .post_ffn_norm
            .as_ref()
            .expect("post_feedforward_norm requires a post-ffn norm weight");
        rms_norm(device, registry, pool, recorder, &ffn_out, weight, dims.num_tokens, dims.hidden_size, norm, "post_ffn_norm")?
    } else {
        ffn_out
    };

    let out = residual_add(device, registry, pool, recorder, &after_attn, &ffn_out, dims.num_tokens, dims.hidden_size, "ffn_residual")?;
    recorder.track_temporary(after_attn.buffer.clone());
    recorder.track_temporary(ffn_out.buffer.clone());
    Ok(out)
}
