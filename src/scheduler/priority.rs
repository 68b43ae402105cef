//! Priority policies over the ready set: `height` (longest remaining work
//! first), `slack` (least slack first), and `mix` (slack, then height, then
//! out-degree). `jitter` adds noise to the primary sort key so the
//! stochastic search in [`crate::scheduler::anneal`] can perturb a schedule
//! without hand-rolling a separate priority-vector representation.

use std::cmp::Ordering;

use nanorand::{Rng, WyRand};

use crate::scheduler::config::Policy;
use crate::scheduler::graph::DependencyGraph;

/// Re-ranks `ready` (task ids) highest priority first, with a deterministic
/// ascending-id tie-break so two runs with `jitter = 0.0` produce identical
/// schedules.
pub fn rank_ready(ready: &[u32], graph: &DependencyGraph, policy: Policy, jitter: f32, rng: &mut WyRand) -> Vec<u32> {
    struct Scored {
        id: u32,
        key: f64,
        height: u32,
        out_degree: u32,
    }

    let mut scored: Vec<Scored> = ready
        .iter()
        .map(|&id| {
            let noise = if jitter > 0.0 {
                rng.generate_range(-jitter..=jitter) as f64
            } else {
                0.0
            };
            let slack = graph.slack[&id];
            let height = graph.height[&id];
            let primary = match policy {
                Policy::Height => -(height as f64),
                Policy::Slack | Policy::Mix => slack as f64,
            };
            Scored {
                id,
                key: primary + noise,
                height,
                out_degree: graph.out_degree[&id],
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        let order = a.key.partial_cmp(&b.key).unwrap_or(Ordering::Equal);
        let order = match policy {
            Policy::Height => order,
            Policy::Slack => order.then_with(|| b.height.cmp(&a.height)),
            Policy::Mix => order.then_with(|| b.height.cmp(&a.height)).then_with(|| b.out_degree.cmp(&a.out_degree)),
        };
        order.then_with(|| a.id.cmp(&b.id))
    });

    scored.into_iter().map(|s| s.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::graph::build;
    use crate::scheduler::task::{Engine, HazardConfig, Task};

    #[test]
    fn height_policy_prefers_longer_remaining_chains() {
        let tasks = vec![
            Task::new(0, Engine::Valu).with_writes(vec![1]),
            Task::new(1, Engine::Valu).with_reads(vec![1]).with_writes(vec![2]),
            Task::new(2, Engine::Valu).with_reads(vec![2]),
            Task::new(3, Engine::Alu),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let mut rng = WyRand::new_seed(0);
        let ranked = rank_ready(&[0, 3], &graph, Policy::Height, 0.0, &mut rng);
        assert_eq!(ranked[0], 0);
    }

    #[test]
    fn zero_jitter_is_deterministic_across_runs() {
        let tasks = vec![Task::new(0, Engine::Valu), Task::new(1, Engine::Valu), Task::new(2, Engine::Valu)];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let mut rng_a = WyRand::new_seed(7);
        let mut rng_b = WyRand::new_seed(99);
        let ranked_a = rank_ready(&[0, 1, 2], &graph, Policy::Mix, 0.0, &mut rng_a);
        let ranked_b = rank_ready(&[0, 1, 2], &graph, Policy::Mix, 0.0, &mut rng_b);
        assert_eq!(ranked_a, ranked_b);
    }

    #[test]
    fn slack_policy_prefers_least_slack_first() {
        let tasks = vec![
            Task::new(0, Engine::Valu).with_writes(vec![1]),
            Task::new(1, Engine::Valu).with_reads(vec![1]),
            Task::new(2, Engine::Alu),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let mut rng = WyRand::new_seed(0);
        let ranked = rank_ready(&[0, 2], &graph, Policy::Slack, 0.0, &mut rng);
        assert_eq!(ranked[0], 0);
    }
}
