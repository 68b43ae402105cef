//! Dependency graph construction and static analysis over a task list:
//! hazard-edge derivation (RAW/WAW/WAR, optional RAR and temp-aliasing),
//! topological order, earliest-start, height, slack, and out-degree.

use std::collections::HashMap;

use crate::error::{DopplerError, Result};
use crate::scheduler::task::{HazardConfig, Task};

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
    pub latency: u32,
}

/// The derived graph plus the per-node static-analysis numbers computed over
/// it. Indexed by task id, so callers can hold this alongside the original
/// task list and look values up by `task.id`.
pub struct DependencyGraph {
    pub edges: Vec<Edge>,
    pub predecessors: HashMap<u32, Vec<Edge>>,
    pub successors: HashMap<u32, Vec<Edge>>,
    pub topo_order: Vec<u32>,
    pub earliest_static: HashMap<u32, u32>,
    pub height: HashMap<u32, u32>,
    pub slack: HashMap<u32, i64>,
    pub out_degree: HashMap<u32, u32>,
    pub critical_path: u32,
}

/// Builds the merged dependency list (explicit `deps` plus hazard edges, in
/// task-index order) and runs the static analysis pass over it.
pub fn build(tasks: &[Task], hazards: &HazardConfig) -> Result<DependencyGraph> {
    let mut edges = Vec::new();

    let mut last_writer: HashMap<u64, u32> = HashMap::new();
    let mut readers_since_write: HashMap<u64, Vec<u32>> = HashMap::new();
    let mut last_tagged: HashMap<u32, u32> = HashMap::new();

    for task in tasks {
        for &dep in &task.deps {
            edges.push(Edge {
                from: dep,
                to: task.id,
                latency: 1,
            });
        }

        for &addr in &task.reads {
            if let Some(&writer) = last_writer.get(&addr) {
                edges.push(Edge {
                    from: writer,
                    to: task.id,
                    latency: hazards.raw_latency,
                });
            }
            if hazards.rar_enabled {
                if let Some(readers) = readers_since_write.get(&addr) {
                    for &reader in readers {
                        edges.push(Edge {
                            from: reader,
                            to: task.id,
                            latency: hazards.rar_latency,
                        });
                    }
                }
            }
        }

        for &addr in &task.writes {
            if let Some(&writer) = last_writer.get(&addr) {
                edges.push(Edge {
                    from: writer,
                    to: task.id,
                    latency: hazards.waw_latency,
                });
            }
            if let Some(readers) = readers_since_write.get(&addr) {
                for &reader in readers {
                    edges.push(Edge {
                        from: reader,
                        to: task.id,
                        latency: hazards.war_latency,
                    });
                }
            }
        }

        if hazards.temp_alias_enabled {
            if let Some(tag) = task.temp_tag {
                if let Some(&prev) = last_tagged.get(&tag) {
                    edges.push(Edge {
                        from: prev,
                        to: task.id,
                        latency: hazards.temp_alias_latency,
                    });
                }
                last_tagged.insert(tag, task.id);
            }
        }

        for &addr in &task.reads {
            readers_since_write.entry(addr).or_default().push(task.id);
        }
        for &addr in &task.writes {
            last_writer.insert(addr, task.id);
            readers_since_write.insert(addr, Vec::new());
        }
    }

    let mut predecessors: HashMap<u32, Vec<Edge>> = HashMap::new();
    let mut successors: HashMap<u32, Vec<Edge>> = HashMap::new();
    for &edge in &edges {
        predecessors.entry(edge.to).or_default().push(edge);
        successors.entry(edge.from).or_default().push(edge);
    }

    let topo_order = topological_sort(tasks, &predecessors)?;

    let mut earliest_static = HashMap::new();
    for &id in &topo_order {
        let earliest = predecessors
            .get(&id)
            .map(|preds| {
                preds
                    .iter()
                    .map(|e| earliest_static.get(&e.from).copied().unwrap_or(0) + e.latency)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        earliest_static.insert(id, earliest);
    }

    let mut height = HashMap::new();
    for &id in topo_order.iter().rev() {
        let h = successors
            .get(&id)
            .map(|succs| {
                succs
                    .iter()
                    .map(|e| e.latency + height.get(&e.to).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        height.insert(id, h);
    }

    let critical_path = topo_order
        .iter()
        .map(|id| earliest_static[id] + height[id])
        .max()
        .unwrap_or(0);

    let mut slack = HashMap::new();
    let mut out_degree = HashMap::new();
    for &id in &topo_order {
        slack.insert(id, critical_path as i64 - (earliest_static[&id] + height[&id]) as i64);
        out_degree.insert(id, successors.get(&id).map(|s| s.len() as u32).unwrap_or(0));
    }

    Ok(DependencyGraph {
        edges,
        predecessors,
        successors,
        topo_order,
        earliest_static,
        height,
        slack,
        out_degree,
        critical_path,
    })
}

fn topological_sort(tasks: &[Task], predecessors: &HashMap<u32, Vec<Edge>>) -> Result<Vec<u32>> {
    let mut in_degree: HashMap<u32, u32> = HashMap::new();
    for task in tasks {
        in_degree.insert(task.id, predecessors.get(&task.id).map(|p| p.len() as u32).unwrap_or(0));
    }

    let mut successors_of: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&to, preds) in predecessors {
        for edge in preds {
            successors_of.entry(edge.from).or_default().push(to);
        }
    }

    let mut ready: Vec<u32> = tasks.iter().filter(|t| in_degree[&t.id] == 0).map(|t| t.id).collect();
    ready.sort_unstable();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(id) = ready.pop() {
        order.push(id);
        if let Some(succs) = successors_of.get(&id) {
            let mut newly_ready = Vec::new();
            for &s in succs {
                let deg = in_degree.get_mut(&s).expect("successor must have an in-degree entry");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(s);
                }
            }
            ready.extend(newly_ready);
            ready.sort_unstable();
        }
    }

    if order.len() != tasks.len() {
        return Err(DopplerError::DependencyViolation(format!(
            "task graph has a cycle: {} of {} tasks are reachable from a zero in-degree root",
            order.len(),
            tasks.len()
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::Engine;

    #[test]
    fn raw_hazard_orders_reader_after_writer() {
        let tasks = vec![
            Task::new(0, Engine::Load).with_writes(vec![100]),
            Task::new(1, Engine::Valu).with_reads(vec![100]),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        assert_eq!(graph.earliest_static[&1], 1);
        assert_eq!(graph.height[&0], 1);
    }

    #[test]
    fn independent_tasks_have_zero_earliest_and_full_slack() {
        let tasks = vec![Task::new(0, Engine::Valu), Task::new(1, Engine::Alu)];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        assert_eq!(graph.earliest_static[&0], 0);
        assert_eq!(graph.earliest_static[&1], 0);
        assert_eq!(graph.critical_path, 0);
    }

    #[test]
    fn explicit_dep_cycle_is_a_dependency_violation() {
        let tasks = vec![
            Task::new(0, Engine::Valu).with_deps(vec![1]),
            Task::new(1, Engine::Valu).with_deps(vec![0]),
        ];
        let err = build(&tasks, &HazardConfig::default()).unwrap_err();
        assert!(matches!(err, DopplerError::DependencyViolation(_)));
    }

    #[test]
    fn war_hazard_orders_writer_after_reader() {
        let tasks = vec![
            Task::new(0, Engine::Valu).with_reads(vec![200]),
            Task::new(1, Engine::Store).with_writes(vec![200]),
        ];
        let graph = build(&tasks, &HazardConfig::default()).unwrap();
        assert_eq!(graph.earliest_static[&1], 1);
    }
}
