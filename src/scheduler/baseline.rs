//! Bundle-ordered baseline schedule and the per-engine lower bound, used as
//! a comparison point for the heuristic/annealed schedules.

use std::collections::HashMap;

use crate::error::Result;
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::issue::{run_loop, Schedule};
use crate::scheduler::task::{Engine, EngineCaps, Task};

/// Schedules tasks respecting each task's `bundle` hint (ascending, ties by
/// id; tasks with no bundle hint sort last, also by id) instead of a
/// computed priority policy.
pub fn bundle_ordered(tasks: &[Task], graph: &DependencyGraph, caps: &EngineCaps, engine_order: &[Engine]) -> Result<Schedule> {
    let bundle_of: HashMap<u32, Option<u32>> = tasks.iter().map(|t| (t.id, t.bundle)).collect();
    run_loop(tasks, graph, caps, engine_order, |ready| {
        let mut ranked: Vec<u32> = ready.to_vec();
        ranked.sort_by_key(|&id| (bundle_of[&id].is_none(), bundle_of[&id], id));
        ranked
    })
}

/// `max_engine(ceil(tasks_on_engine / cap_engine))`: the fewest cycles any
/// schedule could possibly take, ignoring dependencies entirely.
pub fn lower_bound(tasks: &[Task], caps: &EngineCaps) -> u32 {
    let mut per_engine: HashMap<Engine, u32> = HashMap::new();
    for task in tasks {
        *per_engine.entry(task.engine).or_insert(0) += 1;
    }
    per_engine
        .into_iter()
        .map(|(engine, count)| {
            let cap = caps.cap(engine).max(1);
            count.div_ceil(cap)
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::graph::build;
    use crate::scheduler::task::HazardConfig;

    #[test]
    fn lower_bound_matches_busiest_engine() {
        let tasks = vec![
            Task::new(0, Engine::Valu),
            Task::new(1, Engine::Valu),
            Task::new(2, Engine::Valu),
            Task::new(3, Engine::Alu),
        ];
        let caps = EngineCaps::new().with(Engine::Valu, 2).with(Engine::Alu, 1);
        assert_eq!(lower_bound(&tasks, &caps), 2);
    }

    #[test]
    fn bundle_order_is_respected_when_dependencies_allow() {
        let tasks = vec![
            Task::new(0, Engine::Valu).with_bundle(1),
            Task::new(1, Engine::Valu).with_bundle(0),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::new().with(Engine::Valu, 1);
        let result = bundle_ordered(&tasks, &graph, &caps, &Engine::ALL).unwrap();
        assert!(result.is_valid());
        assert!(result.task_cycle[&1] < result.task_cycle[&0]);
    }
}
