//! Cycle-by-cycle issue loop: per cycle, re-rank the ready set, partition by
//! engine, and admit up to each engine's cap in priority order, skipping
//! tasks whose write address collides with one already admitted this cycle.

use std::collections::{HashMap, HashSet};

use nanorand::WyRand;

use crate::error::{DopplerError, Result};
use crate::scheduler::config::Policy;
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::priority::rank_ready;
use crate::scheduler::task::{Engine, EngineCaps, Task};

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub cycles: u32,
    pub slots: Vec<HashMap<Engine, Vec<u32>>>,
    pub task_cycle: HashMap<u32, u32>,
    pub utilization: f64,
    pub missing: usize,
    pub duplicates: usize,
    pub violations: usize,
}

impl Schedule {
    pub fn is_valid(&self) -> bool {
        self.missing == 0 && self.duplicates == 0 && self.violations == 0
    }
}

/// Runs the issue loop to completion. `engine_order` is the caller-supplied
/// admission order for step 3 of the loop; `policy`/`jitter`/`rng` drive the
/// per-cycle re-ranking.
pub fn schedule(
    tasks: &[Task],
    graph: &DependencyGraph,
    caps: &EngineCaps,
    engine_order: &[Engine],
    policy: Policy,
    jitter: f32,
    rng: &mut WyRand,
) -> Result<Schedule> {
    run_loop(tasks, graph, caps, engine_order, |ready| rank_ready(ready, graph, policy, jitter, rng))
}

/// Same issue loop, but with the re-ranking step supplied by the caller
/// instead of a [`Policy`] — used by the bundle-ordered baseline, which
/// ranks by `bundle` hint rather than height/slack.
pub fn run_loop(
    tasks: &[Task],
    graph: &DependencyGraph,
    caps: &EngineCaps,
    engine_order: &[Engine],
    mut rank_fn: impl FnMut(&[u32]) -> Vec<u32>,
) -> Result<Schedule> {
    let task_by_id: HashMap<u32, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut remaining: HashSet<u32> = tasks.iter().map(|t| t.id).collect();
    let mut scheduled: HashMap<u32, u32> = HashMap::new();
    let mut slots: Vec<HashMap<Engine, Vec<u32>>> = Vec::new();
    let mut violations = 0usize;

    let earliest_time = |id: u32, scheduled: &HashMap<u32, u32>| -> u32 {
        graph
            .predecessors
            .get(&id)
            .map(|preds| preds.iter().map(|e| scheduled[&e.from] + e.latency).max().unwrap_or(0))
            .unwrap_or(0)
    };

    let mut c: u32 = 0;
    let mut stall_cycles = 0u32;
    let stall_limit = tasks.len() as u32 + 1;

    while !remaining.is_empty() {
        let frontier: Vec<u32> = remaining
            .iter()
            .copied()
            .filter(|&id| {
                graph
                    .predecessors
                    .get(&id)
                    .map_or(true, |preds| preds.iter().all(|e| scheduled.contains_key(&e.from)))
            })
            .collect();

        if frontier.is_empty() {
            violations += 1;
            break;
        }

        let ready: Vec<u32> = frontier.iter().copied().filter(|&id| earliest_time(id, &scheduled) <= c).collect();

        if ready.is_empty() {
            let next_c = frontier.iter().map(|&id| earliest_time(id, &scheduled)).min().expect("frontier non-empty");
            for _ in c..next_c {
                slots.push(HashMap::new());
            }
            c = next_c;
            stall_cycles = 0;
            continue;
        }

        let ranked = rank_fn(&ready);

        let mut by_engine: HashMap<Engine, Vec<u32>> = HashMap::new();
        for &id in &ranked {
            by_engine.entry(task_by_id[&id].engine).or_default().push(id);
        }

        let mut cycle_slots: HashMap<Engine, Vec<u32>> = HashMap::new();
        let mut admitted_writes: HashSet<u64> = HashSet::new();
        let mut admitted_count = 0usize;

        for &engine in engine_order {
            let cap = caps.cap(engine);
            let Some(candidates) = by_engine.get(&engine) else { continue };
            let mut admitted_on_engine = 0u32;
            for &id in candidates {
                if admitted_on_engine >= cap {
                    break;
                }
                let task = task_by_id[&id];
                if task.writes.iter().any(|w| admitted_writes.contains(w)) {
                    continue;
                }
                cycle_slots.entry(engine).or_default().push(id);
                admitted_writes.extend(task.writes.iter().copied());
                scheduled.insert(id, c);
                remaining.remove(&id);
                admitted_on_engine += 1;
                admitted_count += 1;
            }
        }

        slots.push(cycle_slots);
        c += 1;

        if admitted_count == 0 {
            stall_cycles += 1;
            if stall_cycles > stall_limit {
                violations += 1;
                break;
            }
        } else {
            stall_cycles = 0;
        }
    }

    let cycles = slots.len() as u32;
    let non_debug_slot_count: u32 = Engine::ALL.iter().filter(|&&e| e != Engine::Debug).map(|&e| caps.cap(e)).sum();
    let occupied_non_debug: usize = slots
        .iter()
        .map(|cycle| {
            cycle
                .iter()
                .filter(|(&engine, _)| engine != Engine::Debug)
                .map(|(_, ids)| ids.len())
                .sum::<usize>()
        })
        .sum();
    let utilization = if cycles > 0 && non_debug_slot_count > 0 {
        occupied_non_debug as f64 / (cycles as f64 * non_debug_slot_count as f64)
    } else {
        0.0
    };

    let missing = tasks.len() - scheduled.len();
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    for cycle in &slots {
        for ids in cycle.values() {
            for &id in ids {
                if !seen.insert(id) {
                    duplicates += 1;
                }
            }
        }
    }

    if missing > 0 && violations == 0 {
        return Err(DopplerError::DependencyViolation(format!(
            "scheduler left {missing} of {} tasks unscheduled with no forward progress",
            tasks.len()
        )));
    }

    Ok(Schedule {
        cycles,
        slots,
        task_cycle: scheduled,
        utilization,
        missing,
        duplicates,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::graph::build;
    use crate::scheduler::task::HazardConfig;

    fn default_order() -> Vec<Engine> {
        Engine::ALL.to_vec()
    }

    #[test]
    fn independent_tasks_pack_into_one_cycle_per_engine_cap() {
        let tasks = vec![Task::new(0, Engine::Valu), Task::new(1, Engine::Valu), Task::new(2, Engine::Alu)];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::new().with(Engine::Valu, 2).with(Engine::Alu, 1);
        let mut rng = WyRand::new_seed(0);
        let result = schedule(&tasks, &graph, &caps, &default_order(), Policy::Height, 0.0, &mut rng).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.cycles, 1);
    }

    #[test]
    fn raw_hazard_forces_two_cycles() {
        let tasks = vec![
            Task::new(0, Engine::Load).with_writes(vec![1]),
            Task::new(1, Engine::Valu).with_reads(vec![1]),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::default();
        let mut rng = WyRand::new_seed(0);
        let result = schedule(&tasks, &graph, &caps, &default_order(), Policy::Slack, 0.0, &mut rng).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.task_cycle[&1], result.task_cycle[&0] + 1);
    }

    #[test]
    fn write_write_collision_is_serialized_within_engine_cap() {
        let tasks = vec![
            Task::new(0, Engine::Store).with_writes(vec![5]),
            Task::new(1, Engine::Store).with_writes(vec![5]),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        let caps = EngineCaps::new().with(Engine::Store, 2);
        let mut rng = WyRand::new_seed(0);
        let result = schedule(&tasks, &graph, &caps, &default_order(), Policy::Height, 0.0, &mut rng).unwrap();
        assert!(result.is_valid());
        assert_ne!(result.task_cycle[&0], result.task_cycle[&1]);
    }
}
