//! Stochastic search over schedules: `restarts` independent runs, each
//! annealing `mutation_count` priority-jitter perturbations with geometric
//! cooling, keeping the best schedule seen by (cycles, utilization) with
//! cycles dominant.

use nanorand::{Rng, WyRand};

use crate::error::{DopplerError, Result};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::issue::{schedule, Schedule};
use crate::scheduler::task::{Engine, EngineCaps, Task};

fn cost(result: &Schedule) -> f64 {
    result.cycles as f64 * 1_000.0 - result.utilization
}

/// Runs the full restart/anneal search and returns the best valid schedule
/// found. `seed` makes the search reproducible for a fixed task list and
/// config; callers that want a fresh search each time should vary it (e.g.
/// from `sampling.seed` or a call counter).
pub fn search(
    tasks: &[Task],
    graph: &DependencyGraph,
    caps: &EngineCaps,
    engine_order: &[Engine],
    config: &SchedulerConfig,
    seed: u64,
) -> Result<Schedule> {
    let mut rng = WyRand::new_seed(seed);
    let mut best: Option<Schedule> = None;

    for _ in 0..config.restarts.max(1) {
        let mut current = schedule(tasks, graph, caps, engine_order, config.policy, 0.0, &mut rng)?;
        let mut current_cost = cost(&current);
        let mut temperature = config.temperature_start;

        for _ in 0..config.mutation_count {
            let effective_jitter = config.jitter * temperature;
            let candidate = schedule(tasks, graph, caps, engine_order, config.policy, effective_jitter, &mut rng)?;
            let candidate_cost = cost(&candidate);
            let delta = candidate_cost - current_cost;
            let accept = delta <= 0.0 || rng.generate_range(0.0f32..=1.0) < ((-delta / temperature.max(1e-6) as f64).exp()) as f32;
            if accept {
                current = candidate;
                current_cost = candidate_cost;
            }
            temperature *= config.temperature_decay;
        }

        if best.as_ref().map_or(true, |b| current_cost < cost(b)) {
            best = Some(current);
        }
    }

    best.ok_or_else(|| DopplerError::DependencyViolation("scheduler search produced no candidate schedules".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::config::Policy;
    use crate::scheduler::graph::build;
    use crate::scheduler::task::HazardConfig;

    #[test]
    fn search_returns_a_valid_schedule() {
        let tasks = vec![
            Task::new(0, Engine::Load).with_writes(vec![1]),
            Task::new(1, Engine::Valu).with_reads(vec![1]).with_writes(vec![2]),
            Task::new(2, Engine::Store).with_reads(vec![2]),
            Task::new(3, Engine::Alu),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::default();
        let config = SchedulerConfig {
            policy: Policy::Mix,
            restarts: 3,
            temperature_start: 1.0,
            temperature_decay: 0.8,
            mutation_count: 5,
            jitter: 0.5,
        };
        let best = search(&tasks, &graph, &caps, &Engine::ALL, &config, 42).unwrap();
        assert!(best.is_valid());
        assert_eq!(best.missing, 0);
    }

    #[test]
    fn zero_restarts_still_returns_one_schedule() {
        let tasks = vec![Task::new(0, Engine::Valu)];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::default();
        let config = SchedulerConfig {
            restarts: 0,
            mutation_count: 0,
            ..SchedulerConfig::default()
        };
        let best = search(&tasks, &graph, &caps, &Engine::ALL, &config, 1).unwrap();
        assert!(best.is_valid());
    }
}
