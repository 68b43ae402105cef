//! Task and hazard model for the VLIW micro-scheduler: the input DAG nodes
//! and the configuration that turns their reads/writes into latency-weighted
//! dependency edges.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Engine {
    Valu,
    Alu,
    Flow,
    Load,
    Store,
    Debug,
}

impl Engine {
    pub const ALL: [Engine; 6] = [
        Engine::Valu,
        Engine::Alu,
        Engine::Flow,
        Engine::Load,
        Engine::Store,
        Engine::Debug,
    ];
}

/// One micro-task: an id, the engine it issues on, explicit dependency ids,
/// the addresses it reads and writes, an optional temp-register tag for the
/// temp-aliasing hazard class, and an optional bundle hint used by the
/// baseline scheduler.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u32,
    pub engine: Engine,
    pub deps: Vec<u32>,
    pub reads: Vec<u64>,
    pub writes: Vec<u64>,
    pub temp_tag: Option<u32>,
    pub bundle: Option<u32>,
}

impl Task {
    pub fn new(id: u32, engine: Engine) -> Self {
        Task {
            id,
            engine,
            deps: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            temp_tag: None,
            bundle: None,
        }
    }

    pub fn with_deps(mut self, deps: Vec<u32>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_reads(mut self, reads: Vec<u64>) -> Self {
        self.reads = reads;
        self
    }

    pub fn with_writes(mut self, writes: Vec<u64>) -> Self {
        self.writes = writes;
        self
    }

    pub fn with_temp_tag(mut self, tag: u32) -> Self {
        self.temp_tag = Some(tag);
        self
    }

    pub fn with_bundle(mut self, bundle: u32) -> Self {
        self.bundle = Some(bundle);
        self
    }
}

/// Which hazard classes are enabled and their latency. RAW, WAW, and WAR are
/// always checked; RAR and temp-aliasing are opt-in since most engines don't
/// need them (two reads of the same address never need ordering unless the
/// underlying resource has read-port contention).
#[derive(Debug, Clone)]
pub struct HazardConfig {
    pub raw_latency: u32,
    pub waw_latency: u32,
    pub war_latency: u32,
    pub rar_enabled: bool,
    pub rar_latency: u32,
    pub temp_alias_enabled: bool,
    pub temp_alias_latency: u32,
}

impl Default for HazardConfig {
    fn default() -> Self {
        HazardConfig {
            raw_latency: 1,
            waw_latency: 1,
            war_latency: 1,
            rar_enabled: false,
            rar_latency: 1,
            temp_alias_enabled: false,
            temp_alias_latency: 1,
        }
    }
}

/// Per-engine issue width (how many tasks on that engine may be admitted in
/// a single cycle).
#[derive(Debug, Clone)]
pub struct EngineCaps(HashMap<Engine, u32>);

impl EngineCaps {
    pub fn new() -> Self {
        EngineCaps(HashMap::new())
    }

    pub fn with(mut self, engine: Engine, cap: u32) -> Self {
        self.0.insert(engine, cap);
        self
    }

    pub fn cap(&self, engine: Engine) -> u32 {
        self.0.get(&engine).copied().unwrap_or(1)
    }
}

impl Default for EngineCaps {
    /// One slot per engine unless the caller overrides it.
    fn default() -> Self {
        let mut caps = HashMap::new();
        for engine in Engine::ALL {
            caps.insert(engine, 1);
        }
        EngineCaps(caps)
    }
}
