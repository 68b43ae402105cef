//! VLIW-style micro-scheduler: given a DAG of micro-tasks annotated with
//! engine classes and hazards, produces a cycle-by-cycle issue schedule
//! honoring per-engine issue-width caps and latency-weighted dependencies.
//!
//! [`ScoreMode::Relaxed`] (the default) runs the full heuristic/annealed
//! search; [`ScoreMode::Bundle`] instead reproduces the bundle-ordered
//! baseline exactly, for regression tests that pin a known-good schedule.

pub mod anneal;
pub mod baseline;
pub mod config;
pub mod graph;
pub mod issue;
pub mod priority;
pub mod task;

pub use config::{Policy, SchedulerConfig};
pub use issue::Schedule;
pub use task::{Engine, EngineCaps, HazardConfig, Task};

use crate::error::Result;

/// Which scheduling strategy [`run`] uses. `Relaxed` is the engine's normal
/// mode; `Bundle` exists only so regression tests can assert parity against
/// a fixed, deterministic bundle order when a reference schedule is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreMode {
    #[default]
    Relaxed,
    Bundle,
}

pub struct SchedulerOutput {
    pub schedule: Schedule,
    pub lower_bound: u32,
}

/// Builds the dependency graph and produces a schedule per `score_mode`,
/// alongside the engine-cap lower bound for comparison.
pub fn run(
    tasks: &[Task],
    hazards: &HazardConfig,
    caps: &EngineCaps,
    engine_order: &[Engine],
    config: &SchedulerConfig,
    seed: u64,
    score_mode: ScoreMode,
) -> Result<SchedulerOutput> {
    config.validate()?;
    let graph = graph::build(tasks, hazards)?;
    let schedule = match score_mode {
        ScoreMode::Relaxed => anneal::search(tasks, &graph, caps, engine_order, config, seed)?,
        ScoreMode::Bundle => baseline::bundle_ordered(tasks, &graph, caps, engine_order)?,
    };
    let lower_bound = baseline::lower_bound(tasks, caps);
    Ok(SchedulerOutput { schedule, lower_bound })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_and_bundle_modes_both_produce_valid_schedules() {
        let tasks = vec![
            Task::new(0, Engine::Load).with_writes(vec![1]).with_bundle(0),
            Task::new(1, Engine::Valu).with_reads(vec![1]).with_bundle(1),
            Task::new(2, Engine::Alu).with_bundle(0),
        ];
        let hazards = HazardConfig::default();
        let caps = EngineCaps::default();
        let config = SchedulerConfig {
            restarts: 2,
            mutation_count: 3,
            ..SchedulerConfig::default()
        };

        let relaxed = run(&tasks, &hazards, &caps, &Engine::ALL, &config, 1, ScoreMode::Relaxed).unwrap();
        assert!(relaxed.schedule.is_valid());
        assert!(relaxed.schedule.cycles >= relaxed.lower_bound);

        let bundled = run(&tasks, &hazards, &caps, &Engine::ALL, &config, 1, ScoreMode::Bundle).unwrap();
        assert!(bundled.schedule.is_valid());
    }

    #[test]
    fn bundle_score_mode_matches_the_bundle_baseline_exactly() {
        let tasks = vec![
            Task::new(0, Engine::Load).with_writes(vec![1]).with_bundle(0),
            Task::new(1, Engine::Load).with_bundle(0),
            Task::new(2, Engine::Valu).with_reads(vec![1]).with_bundle(1),
            Task::new(3, Engine::Alu).with_bundle(1),
            Task::new(4, Engine::Flow).with_bundle(2),
            Task::new(5, Engine::Store).with_bundle(2),
        ];
        let hazards = HazardConfig::default();
        let caps = EngineCaps::new()
            .with(Engine::Valu, 1)
            .with(Engine::Alu, 1)
            .with(Engine::Flow, 1)
            .with(Engine::Load, 2)
            .with(Engine::Store, 1);
        let config = SchedulerConfig::default();

        let via_run = run(&tasks, &hazards, &caps, &Engine::ALL, &config, 7, ScoreMode::Bundle).unwrap();
        let graph = graph::build(&tasks, &hazards).unwrap();
        let via_baseline = baseline::bundle_ordered(&tasks, &graph, &caps, &Engine::ALL).unwrap();

        assert_eq!(via_run.schedule.cycles, via_baseline.cycles);
        assert_eq!(via_run.schedule.task_cycle, via_baseline.task_cycle);
    }
}
