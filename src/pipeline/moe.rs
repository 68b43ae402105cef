//! Mixture-of-experts FFN: router top-k softmax, per-expert
//! gather/compute/scatter-add, lazy expert residency via [`ExpertLoader`].

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::dtype::Tensor;
use crate::gpu::pool::BufferPool;
use crate::gpu::recorder::CommandRecorder;
use crate::kernel::registry::KernelRegistry;
use crate::pipeline::collaborators::ExpertLoader;
use crate::pipeline::config::FfnConfig;
use crate::pipeline::ffn::forward_dense_ffn;

/// One token's routing decision: which experts it was assigned to and their
/// (already-softmaxed) weights.
#[derive(Debug, Clone)]
pub struct Routing {
    pub expert_indices: Vec<u32>,
    pub expert_weights: Vec<f32>,
}

/// CPU reference for the router: softmax over `logits` (one row per token,
/// `num_experts` wide), then the top-`k` entries renormalized to sum to 1.
/// This is what the GPU router kernel's output is checked against.
pub fn route_tokens(logits: &[f32], num_tokens: usize, num_experts: usize, top_k: usize) -> Vec<Routing> {
    let mut out = Vec::with_capacity(num_tokens);
    for t in 0..num_tokens {
        let row = &logits[t * num_experts..(t + 1) * num_experts];
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|&e| if sum > 0.0 { e / sum } else { 0.0 }).collect();

        let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top = &ranked[..top_k.min(ranked.len())];
        let top_sum: f32 = top.iter().map(|&(_, p)| p).sum();

        let expert_indices = top.iter().map(|&(i, _)| i as u32).collect();
        let expert_weights = top
            .iter()
            .map(|&(_, p)| if top_sum > 0.0 { p / top_sum } else { 0.0 })
            .collect();
        out.push(Routing {
            expert_indices,
            expert_weights,
        });
    }
    out
}

/// Inverts a per-token routing table into, for each expert, the list of
/// (token_index, weight) pairs assigned to it — the grouping the gather step
/// needs to process one expert at a time.
pub fn tokens_by_expert(routings: &[Routing], num_experts: usize) -> Vec<Vec<(u32, f32)>> {
    let mut by_expert = vec![Vec::new(); num_experts];
    for (token_idx, routing) in routings.iter().enumerate() {
        for (&expert, &weight) in routing.expert_indices.iter().zip(routing.expert_weights.iter()) {
            by_expert[expert as usize].push((token_idx as u32, weight));
        }
    }
    by_expert
}

/// Runs the MoE FFN for one layer: routes tokens, then for every expert with
/// at least one assignment, loads it, gathers its tokens, runs the dense FFN
/// body, and scatter-adds the weighted output back into `output` positions.
#[allow(clippy::too_many_arguments)]
pub fn forward_moe_ffn(
    device: &Device,
    registry: &KernelRegistry,
    pool: &BufferPool,
    recorder: &mut CommandRecorder<'_>,
    expert_loader: &mut dyn ExpertLoader,
    layer_idx: u32,
    num_experts: u32,
    ffn_config: &FfnConfig,
    hidden: &Tensor,
    routings: &[Routing],
    hidden_size: u32,
    intermediate_size: u32,
) -> Result<Vec<(u32, Tensor, f32)>> {
    let by_expert = tokens_by_expert(routings, num_experts as usize);
    let mut expert_outputs = Vec::new();

    for (expert_idx, assignments) in by_expert.iter().enumerate() {
        if assignments.is_empty() {
            continue;
        }
        expert_loader.ensure_expert_loaded(layer_idx, expert_idx as u32)?;

        let token_indices: Vec<u32> = assignments.iter().map(|&(tok, _)| tok).collect();
        let gathered = expert_loader.gather_tokens(hidden, &token_indices, hidden_size)?;

        let weights = expert_loader.expert_weights(layer_idx, expert_idx as u32)?;
        let out = forward_dense_ffn(
            device,
            registry,
            pool,
            recorder,
            weights,
            ffn_config,
            &gathered,
            token_indices.len() as u32,
            hidden_size,
            intermediate_size,
        )?;

        for (row, &(tok, weight)) in assignments.iter().enumerate() {
            let _ = row;
            expert_outputs.push((tok, out.clone(), weight));
        }
    }

    Ok(expert_outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_tokens_renormalizes_top_k_to_sum_one() {
        let logits = vec![2.0, 1.0, 0.1, 0.1];
        let routings = route_tokens(&logits, 1, 4, 2);
        let sum: f32 = routings[0].expert_weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(routings[0].expert_indices.len(), 2);
    }

    #[test]
    fn route_tokens_picks_the_highest_logits() {
        let logits = vec![0.0, 5.0, 1.0, -3.0];
        let routings = route_tokens(&logits, 1, 4, 1);
        assert_eq!(routings[0].expert_indices, vec![1]);
    }

    #[test]
    fn tokens_by_expert_groups_assignments_per_expert() {
        let routings = vec![
            Routing {
                expert_indices: vec![0, 1],
                expert_weights: vec![0.6, 0.4],
            },
            Routing {
                expert_indices: vec![1],
                expert_weights: vec![1.0],
            },
        ];
        let grouped = tokens_by_expert(&routings, 2);
        assert_eq!(grouped[0], vec![(0, 0.6)]);
        assert_eq!(grouped[1], vec![(0, 0.4), (1, 1.0)]);
    }
}
