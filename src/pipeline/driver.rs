//! Two-phase prefill/decode driver: one forward pass over the whole
//! prompt, then one forward pass per generated token, each ending at the
//! cooperative model's third and final suspension point — the sampled-token
//! (here, full logit vector) readback.
//!
//! A device loss surfaces as [`DopplerError::DeviceLost`] from any step and
//! is terminal: this driver does not attempt to rebuild the device or retry:
//! per the Design Notes, recovery means dropping every GPU-backed resource
//! built on that device (model, caches, pool) and re-running model load
//! against a freshly acquired one.

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::pool::BufferPool;
use crate::gpu::read_buffer_f32;
use crate::gpu::recorder::CommandRecorder;
use crate::kernel::registry::KernelRegistry;
use crate::pipeline::collaborators::{ExpertLoader, Tokenizer};
use crate::pipeline::model::Model;
use crate::pipeline::moe::Routing;
use crate::pipeline::sampling::sample;

pub struct GenerationResult {
    pub token_ids: Vec<u32>,
    pub text: String,
}

/// One generation request. `uniform_source` supplies the `[0, 1)` draw each
/// sampling step needs — the engine never generates its own randomness
/// so callers thread a seeded RNG or deterministic sequence through
/// here.
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub max_new_tokens: u32,
    pub uniform_source: &'a mut dyn FnMut() -> f32,
    /// Per-layer MoE routing decisions, indexed the same as `model.layers`.
    /// Empty for dense models; for MoE models the caller is responsible for
    /// computing these (a router-logits matmul plus readback per MoE layer,
    /// a documented exception to the three-suspension-point model — see
    /// DESIGN.md) before each `generate` call that needs them.
    pub moe_routings: &'a [Vec<Routing>],
}

/// Runs prefill + decode to completion (stop token or `max_new_tokens`),
/// returning every generated token id and the tokenizer's rendering of them.
#[allow(clippy::too_many_arguments)]
pub fn generate(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    model: &mut Model,
    tokenizer: &dyn Tokenizer,
    mut expert_loader: Option<&mut dyn ExpertLoader>,
    request: GenerationRequest<'_>,
) -> Result<GenerationResult> {
    device.check_alive()?;
    let prompt_ids = tokenizer.encode(request.prompt);
    let stop_tokens = tokenizer.stop_tokens();
    let repetition_window = model.config.sampling.top_k.max(64) as usize;

    let mut generated = prompt_ids.clone();

    let prefill_token = step(
        device,
        registry,
        pool,
        model,
        expert_loader.as_deref_mut(),
        &prompt_ids,
        0,
        &generated,
        repetition_window,
        request.uniform_source,
        request.moe_routings,
    )?;
    generated.push(prefill_token);

    if !stop_tokens.contains(&prefill_token) {
        for _ in 1..request.max_new_tokens {
            device.check_alive()?;
            let position = generated.len() as u32 - 1;
            let last_token = *generated.last().expect("generated always has the prefill token");
            let next = step(
                device,
                registry,
                pool,
                model,
                expert_loader.as_deref_mut(),
                &[last_token],
                position,
                &generated,
                repetition_window,
                request.uniform_source,
                request.moe_routings,
            )?;
            generated.push(next);
            if stop_tokens.contains(&next) {
                break;
            }
        }
    }

    let text = tokenizer.decode(&generated, true, true);
    Ok(GenerationResult {
        token_ids: generated,
        text,
    })
}

/// One forward pass (prefill or a single decode step) plus the sampling
/// suspension point: submit, wait for completion, read the logits back,
/// sample.
#[allow(clippy::too_many_arguments)]
fn step(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    model: &mut Model,
    expert_loader: Option<&mut dyn ExpertLoader>,
    token_ids: &[u32],
    position_offset: u32,
    history: &[u32],
    repetition_window: usize,
    uniform_source: &mut dyn FnMut() -> f32,
    moe_routings: &[Vec<Routing>],
) -> Result<u32> {
    let mut recorder = CommandRecorder::begin(device, pool, "forward_step")?;
    let logits_tensor = model.forward(
        device,
        registry,
        pool,
        &mut recorder,
        token_ids,
        position_offset,
        expert_loader,
        moe_routings,
    )?;
    let num_tokens = token_ids.len() as u64;
    let vocab_size = model.vocab_size as u64;
    let completion = recorder.submit()?;
    completion.wait(device)?;

    // Read back before releasing the buffer: the pool may hand this exact
    // allocation to the next `acquire()` call as soon as it's freed.
    let last_row_offset = (num_tokens - 1) * vocab_size * 4;
    let full = read_buffer_f32(device, &logits_tensor.buffer.raw, num_tokens * vocab_size * 4)?;
    pool.release(logits_tensor.buffer.clone());
    let mut last_row = full[(last_row_offset / 4) as usize..].to_vec();

    let recent_start = history.len().saturating_sub(repetition_window);
    let recent_tokens = &history[recent_start..];
    Ok(sample(&mut last_row, &model.config.sampling, recent_tokens, uniform_source()))
}
