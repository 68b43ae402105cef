//! Whole-model forward pass: embedding lookup, per-layer iteration, final
//! norm, LM head projection, optional final-logit softcap.

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::dtype::{DType, Tensor};
use crate::gpu::pool::BufferPool;
use crate::gpu::recorder::CommandRecorder;
use crate::gpu::uniform::UniformCache;
use crate::kernel::dispatch::{dispatch_kernel, Binding};
use crate::kernel::registry::{KernelRegistry, Operation};
use crate::pipeline::collaborators::{ExpertLoader, LayerType, LayerWeights, ModelManifest, WeightLoader};
use crate::pipeline::config::InferenceConfig;
use crate::pipeline::kv_cache::KvCache;
use crate::pipeline::layer::{forward_layer, rms_norm, LayerDims, MoeInputs};
use crate::pipeline::moe::Routing;

/// A loaded model ready to run forward passes: per-layer weights, one KV
/// cache per layer sized at construction time, and the configuration that
/// governs every dispatch.
pub struct Model {
    pub config: InferenceConfig,
    pub hidden_size: u32,
    pub num_attention_heads: u32,
    pub num_key_value_heads: u32,
    pub head_dim: u32,
    pub intermediate_size: u32,
    pub vocab_size: u32,
    pub num_experts: u32,
    pub scale_embeddings: bool,
    pub embedding: Tensor,
    pub layers: Vec<LayerWeights>,
    pub layer_types: Vec<LayerType>,
    pub final_norm: Tensor,
    pub lm_head: Option<Tensor>,
    pub kv_caches: Vec<KvCache>,
}

impl Model {
    /// Loads every layer's weights and allocates a KV cache sized for
    /// `kv_capacity` positions per layer, dense or sliding-window according
    /// to each layer's declared type.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        device: &Device,
        pool: &BufferPool,
        manifest: &dyn ModelManifest,
        loader: &mut dyn WeightLoader,
        config: InferenceConfig,
        intermediate_size: u32,
        kv_capacity: u32,
    ) -> Result<Self> {
        config.validate()?;
        let embedding = loader.load_embedding()?;
        let num_layers = manifest.num_layers();
        let kv_width = manifest.num_key_value_heads() * manifest.head_dim();

        let mut layers = Vec::with_capacity(num_layers as usize);
        let mut layer_types = Vec::with_capacity(num_layers as usize);
        let mut kv_caches = Vec::with_capacity(num_layers as usize);
        for layer_idx in 0..num_layers {
            let weights = loader.load_layer(layer_idx)?;
            let layer_type = manifest.layer_type(layer_idx);
            let sliding_window = match layer_type {
                LayerType::SlidingAttention => config.attention.sliding_window,
                LayerType::FullAttention => None,
            };

            let row_bytes = kv_width as u64 * 4;
            let k_buf = pool.acquire(device, kv_capacity as u64 * row_bytes, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST, "kv_cache_k")?;
            let v_buf = pool.acquire(device, kv_capacity as u64 * row_bytes, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST, "kv_cache_v")?;
            let k_tensor = Tensor::new(k_buf, DType::F32, [kv_capacity as usize, kv_width as usize], false, "kv_cache_k");
            let v_tensor = Tensor::new(v_buf, DType::F32, [kv_capacity as usize, kv_width as usize], false, "kv_cache_v");

            kv_caches.push(KvCache::new(k_tensor, v_tensor, kv_capacity, sliding_window));
            layers.push(weights);
            layer_types.push(layer_type);
        }

        let final_norm = loader.load_final_norm()?;
        let lm_head = loader.load_lm_head()?;

        Ok(Model {
            config,
            hidden_size: manifest.hidden_size(),
            num_attention_heads: manifest.num_attention_heads(),
            num_key_value_heads: manifest.num_key_value_heads(),
            head_dim: manifest.head_dim(),
            intermediate_size,
            vocab_size: manifest.vocab_size(),
            num_experts: manifest.num_experts(),
            scale_embeddings: manifest.scale_embeddings(),
            embedding,
            layers,
            layer_types,
            final_norm,
            lm_head,
            kv_caches,
        })
    }

    fn embed(&self, device: &Device, registry: &KernelRegistry, pool: &BufferPool, recorder: &mut CommandRecorder<'_>, token_ids: &[u32]) -> Result<Tensor> {
        let num_tokens = token_ids.len() as u32;
        let ids_bytes: Vec<u8> = token_ids.iter().flat_map(|id| id.to_le_bytes()).collect();
        let ids_buf = pool.acquire(device, ids_bytes.len().max(4) as u64, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST, "token_ids")?;
        device.queue().write_buffer(&ids_buf.raw, 0, &ids_bytes);

        let out_buf = pool.acquire(device, num_tokens as u64 * self.hidden_size as u64 * 4, wgpu::BufferUsages::STORAGE, "embedding_gathered")?;
        let cache = UniformCache::new(pool);
        let hidden_size = self.hidden_size;
        let scale = if self.scale_embeddings { (hidden_size as f32).sqrt() } else { 1.0 };
        let uniform = cache.write_uniforms(device, Some(recorder), "embed_uniform", |buf| {
            buf[0..4].copy_from_slice(&hidden_size.to_le_bytes());
            buf[4..8].copy_from_slice(&scale.to_le_bytes());
        })?;
        dispatch_kernel(
            device,
            registry,
            recorder,
            Operation::Gather,
            "embedding_lookup",
            &[
                Binding::Storage(&ids_buf),
                Binding::Storage(&self.embedding.buffer),
                Binding::Storage(&out_buf),
                Binding::Uniform(&uniform),
            ],
            num_tokens as u64 * self.hidden_size as u64,
            "embedding_gather",
        )?;
        recorder.track_temporary(ids_buf);
        Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, self.hidden_size as usize], false, "embedding_gathered"))
    }

    fn lm_head_matmul(&self, device: &Device, registry: &KernelRegistry, pool: &BufferPool, recorder: &mut CommandRecorder<'_>, hidden: &Tensor, num_tokens: u32) -> Result<Tensor> {
        use crate::kernel::selector::{select_matmul, MatmulContext};
        let head = self.lm_head.as_ref().unwrap_or(&self.embedding);
        let ctx = MatmulContext {
            m: num_tokens,
            n: self.vocab_size,
            k: self.hidden_size,
            a_dtype: hidden.dtype,
            b_dtype: head.dtype,
            output_dtype: DType::F32,
            prefer_f16: false,
            use_vec4: self.vocab_size % 4 == 0,
        };
        let variant = select_matmul(&ctx, &device.capabilities);
        let out_buf = pool.acquire(device, num_tokens as u64 * self.vocab_size as u64 * 4, wgpu::BufferUsages::STORAGE, "lm_head_logits")?;
        let cache = UniformCache::new(pool);
        let (m, n, k) = (num_tokens, self.vocab_size, self.hidden_size);
        let uniform = cache.write_uniforms(device, Some(recorder), "lm_head_uniform", |buf| {
            buf[0..4].copy_from_slice(&m.to_le_bytes());
            buf[4..8].copy_from_slice(&n.to_le_bytes());
            buf[8..12].copy_from_slice(&k.to_le_bytes());
        })?;
        dispatch_kernel(
            device,
            registry,
            recorder,
            Operation::Matmul,
            variant,
            &[
                Binding::Storage(&hidden.buffer),
                Binding::Storage(&head.buffer),
                Binding::Storage(&out_buf),
                Binding::Uniform(&uniform),
            ],
            num_tokens as u64 * self.vocab_size as u64,
            "lm_head_matmul",
        )?;
        Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, self.vocab_size as usize], false, "lm_head_logits"))
    }

    /// Runs the full stack over `token_ids` at `position_offset`, returning a
    /// `[num_tokens, vocab_size]` logits tensor. `moe_routings[i]` supplies
    /// the routing decision for layer `i` when that layer is an MoE layer
    /// (ignored otherwise); `expert_loader` is shared across all MoE layers.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &mut self,
        device: &Device,
        registry: &KernelRegistry,
        pool: &BufferPool,
        recorder: &mut CommandRecorder<'_>,
        token_ids: &[u32],
        position_offset: u32,
        expert_loader: Option<&mut dyn ExpertLoader>,
        moe_routings: &[Vec<Routing>],
    ) -> Result<Tensor> {
        let num_tokens = token_ids.len() as u32;
        let mut hidden = self.embed(device, registry, pool, recorder, token_ids)?;

        let mut expert_loader = expert_loader;
        for (layer_idx, weights) in self.layers.iter().enumerate() {
            let layer_type = self.layer_types[layer_idx];
            let dims = LayerDims {
                layer_idx: layer_idx as u32,
                num_tokens,
                position_offset,
                hidden_size: self.hidden_size,
                intermediate_size: self.intermediate_size,
                num_attention_heads: self.num_attention_heads,
                num_key_value_heads: self.num_key_value_heads,
                head_dim: self.head_dim,
            };

            let is_moe_layer = self.num_experts > 0 && weights.router.is_some();
            let moe = if is_moe_layer {
                let routings = moe_routings.get(layer_idx).map(|v| v.as_slice()).unwrap_or(&[]);
                expert_loader.as_deref_mut().map(|loader| MoeInputs {
                    expert_loader: loader,
                    num_experts: self.num_experts,
                    routings,
                })
            } else {
                None
            };

            hidden = forward_layer(
                device,
                registry,
                pool,
                recorder,
                weights,
                &mut self.kv_caches[layer_idx],
                layer_type,
                dims,
                &self.config.normalization,
                &self.config.attention,
                &self.config.rope,
                &self.config.ffn,
                moe,
                &hidden,
            )?;
        }

        let normed = rms_norm(device, registry, pool, recorder, &hidden, &self.final_norm, num_tokens, self.hidden_size, &self.config.normalization, "final_norm")?;
        recorder.track_temporary(hidden.buffer.clone());

        let mut logits = self.lm_head_matmul(device, registry, pool, recorder, &normed, num_tokens)?;
        recorder.track_temporary(normed.buffer.clone());

        if let Some(cap) = self.config.output.final_logit_softcapping {
            logits = Self::dispatch_softcap(device, registry, pool, recorder, &logits, num_tokens, self.vocab_size, cap)?;
        }
        Ok(logits)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_softcap(
        device: &Device,
        registry: &KernelRegistry,
        pool: &BufferPool,
        recorder: &mut CommandRecorder<'_>,
        logits: &Tensor,
        num_tokens: u32,
        vocab_size: u32,
        cap: f32,
    ) -> Result<Tensor> {
        let out_buf = pool.acquire(device, num_tokens as u64 * vocab_size as u64 * 4, wgpu::BufferUsages::STORAGE, "softcapped_logits")?;
        let cache = UniformCache::new(pool);
        let uniform = cache.write_uniforms(device, Some(recorder), "softcap_uniform", |buf| {
            buf[0..4].copy_from_slice(&cap.to_le_bytes());
        })?;
        dispatch_kernel(
            device,
            registry,
            recorder,
            Operation::Activation,
            "softcap",
            &[Binding::Storage(&logits.buffer), Binding::Storage(&out_buf), Binding::Uniform(&uniform)],
            num_tokens as u64 * vocab_size as u64,
            "final_logit_softcap",
        )?;
        recorder.track_temporary(logits.buffer.clone());
        Ok(Tensor::new(out_buf, DType::F32, [num_tokens as usize, vocab_size as usize], false, "softcapped_logits"))
    }
}
