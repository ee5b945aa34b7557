//! Plans: the serialisable state handed from one stage to the next.

use crate::{corpus::Corpus, id::Id, RngType};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};
use thiserror::Error;

/// Format version written into every plan.
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan io: {0}")]
    Io(#[from] io::Error),
    #[error("malformed plan: {0}")]
    Decode(#[from] toml::de::Error),
    #[error("failed to encode plan: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("plan version {have} is not supported (want {want})")]
    Version { want: u32, have: u32 },
    #[error("stage '{stage}' needs the '{needs}' stage to have run first")]
    MissingStage { stage: Stage, needs: Stage },
    #[error("stage needs a single-machine plan, got {0} machines")]
    MachineCount(usize),
}

/// Pipeline phases, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Plan,
    Fuzz,
    Lift,
    Compile,
    Run,
    Collate,
}

impl Stage {
    /// Stage that must already be in a plan's history before this one runs.
    pub fn requires(self) -> Option<Stage> {
        match self {
            Stage::Plan | Stage::Collate => None,
            Stage::Fuzz | Stage::Lift => Some(Stage::Plan),
            Stage::Compile => Some(Stage::Lift),
            Stage::Run => Some(Stage::Compile),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Fuzz => "fuzz",
            Stage::Lift => "lift",
            Stage::Compile => "compile",
            Stage::Run => "run",
            Stage::Collate => "collate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub completed_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    pub creation: DateTime<Utc>,
    /// Root of every random choice made on this plan.
    pub seed: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageRecord>,
}

/// Backend chosen for lifting and interpreting tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: Id,
    /// Tool family, e.g. `herd` or `litmus`.
    pub style: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compiler {
    pub style: Id,
    pub arch: Id,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Optimisation level, e.g. `2` for `-O2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt: Option<String>,
    /// Machine profile, e.g. `native` for `-march=native`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mopt: Option<String>,
}

/// What to test on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePlan {
    pub id: Id,
    pub arch: Id,
    #[serde(default)]
    pub cores: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Keyed by the string form of the compiler id.
    #[serde(default)]
    pub compilers: BTreeMap<String, Compiler>,
}

impl MachinePlan {
    pub fn new(id: Id, arch: Id) -> Self {
        Self {
            id,
            arch,
            cores: 0,
            backend: None,
            compilers: BTreeMap::new(),
        }
    }

    /// Compilers with parsed ids, in id order.
    pub fn compilers(&self) -> impl Iterator<Item = (Id, &Compiler)> + '_ {
        self.compilers
            .iter()
            .filter_map(|(k, c)| k.parse::<Id>().ok().map(|id| (id, c)))
    }

    /// Distinct target architectures of this machine's compilers.
    pub fn arches(&self) -> Vec<Id> {
        let mut arches = self
            .compilers
            .values()
            .map(|c| c.arch.clone())
            .collect::<Vec<_>>();
        arches.sort();
        arches.dedup();
        arches
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub metadata: Metadata,
    /// Keyed by the string form of the machine id.
    #[serde(default)]
    pub machines: BTreeMap<String, MachinePlan>,
    #[serde(default)]
    pub corpus: Corpus,
}

impl Plan {
    pub fn new(seed: i64) -> Self {
        Self {
            metadata: Metadata {
                version: VERSION,
                creation: Utc::now(),
                seed,
                stages: Vec::new(),
            },
            machines: BTreeMap::new(),
            corpus: Corpus::new(),
        }
    }

    /// Fresh generator seeded from the plan seed.
    pub fn rng(&self) -> RngType {
        RngType::seed_from_u64(self.metadata.seed as u64)
    }

    pub fn add_machine(&mut self, m: MachinePlan) {
        self.machines.insert(m.id.to_string(), m);
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.metadata.stages.iter().any(|r| r.stage == stage)
    }

    /// Check that whatever `stage` depends on has already run.
    pub fn confirm_stage(&self, stage: Stage) -> Result<(), PlanError> {
        match stage.requires() {
            Some(needs) if !self.has_stage(needs) => Err(PlanError::MissingStage { stage, needs }),
            _ => Ok(()),
        }
    }

    pub fn record_stage(&mut self, stage: Stage) {
        self.metadata.stages.push(StageRecord {
            stage,
            completed_on: Utc::now(),
        });
    }

    /// One plan per machine, each carrying the whole corpus.
    pub fn split_machines(&self) -> Vec<Plan> {
        self.machines
            .iter()
            .map(|(k, m)| {
                let mut machines = BTreeMap::new();
                machines.insert(k.clone(), m.clone());
                Plan {
                    metadata: self.metadata.clone(),
                    machines,
                    corpus: self.corpus.clone(),
                }
            })
            .collect()
    }

    /// The only machine of a single-machine plan.
    pub fn machine(&self) -> Result<&MachinePlan, PlanError> {
        let mut it = self.machines.values();
        match (it.next(), it.next()) {
            (Some(m), None) => Ok(m),
            _ => Err(PlanError::MachineCount(self.machines.len())),
        }
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self, PlanError> {
        let mut text = String::new();
        r.read_to_string(&mut text)?;
        let plan: Plan = toml::from_str(&text)?;
        if plan.metadata.version != VERSION {
            return Err(PlanError::Version {
                want: VERSION,
                have: plan.metadata.version,
            });
        }
        Ok(plan)
    }

    pub fn write<W: Write>(&self, mut w: W) -> Result<(), PlanError> {
        let text = toml::to_string(self)?;
        w.write_all(text.as_bytes())?;
        w.flush()?;
        Ok(())
    }

    /// Read a plan from `path`, or from stdin if `path` is `-`.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        if path == Path::new("-") {
            Self::read(io::stdin().lock())
        } else {
            Self::read(File::open(path)?)
        }
    }

    /// Write the plan to `path`, or to stdout if `path` is `-`.
    pub fn save(&self, path: &Path) -> Result<(), PlanError> {
        if path == Path::new("-") {
            self.write(io::stdout().lock())
        } else {
            self.write(File::create(path)?)
        }
    }
}
