//! Tester configuration, read from a TOML file.
//!
//! ```toml
//! out_dir = "out"
//!
//! [tools.fuzzer]
//! cmd = "c4f"
//! args = ["fuzz"]
//!
//! [workers]
//! compile = 8
//!
//! [[machines]]
//! id = "localhost"
//! arch = "x86.64"
//! cores = 8
//! backend = { id = "herd", style = "herd" }
//!
//! [machines.compilers."gcc.O3"]
//! style = "gcc"
//! arch = "x86.64"
//! cmd = "gcc"
//! opt = "3"
//! ```

use crate::{
    obs::HerdParser,
    services::{BackendFinder, CmdCompiler, CmdFuzzer, CmdHarnessMaker, CompilerLister, LocalRunner, Services, Tool},
    util::secs,
};
use anyhow::Context;
use director_core::{
    id::Id,
    plan::{Backend, Compiler, MachinePlan},
};
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub out_dir: PathBuf,
    pub tools: Tools,
    pub workers: Workers,
    pub fuzz: FuzzConfig,
    pub timeouts: Timeouts,
    pub machines: Vec<MachineConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
            tools: Tools::default(),
            workers: Workers::default(),
            fuzz: FuzzConfig::default(),
            timeouts: Timeouts::default(),
            machines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolConfig {
    fn new(cmd: &str, args: &[&str]) -> Self {
        Self {
            cmd: cmd.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn tool(&self) -> Tool {
        Tool {
            cmd: self.cmd.clone(),
            args: self.args.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub fuzzer: ToolConfig,
    pub lifter: ToolConfig,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            fuzzer: ToolConfig::new("c4f", &["fuzz", "single"]),
            lifter: ToolConfig::new("c4f", &["lift"]),
        }
    }
}

/// Per-stage worker counts. 0 runs the stage one subject at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workers {
    pub plan: usize,
    pub fuzz: usize,
    pub lift: usize,
    pub compile: usize,
    pub run: usize,
    pub collate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Variants made from each subject.
    pub cycles: usize,
    /// Size to sample the fuzzed corpus down to; 0 keeps everything.
    pub corpus_size: usize,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            cycles: 10,
            corpus_size: 0,
        }
    }
}

/// In seconds; 0 means no timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub compile: u64,
    pub run: u64,
}

impl Timeouts {
    pub fn compile(&self) -> Option<Duration> {
        secs(self.compile)
    }

    pub fn run(&self) -> Option<Duration> {
        secs(self.run)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// `director` executable on the remote side.
    #[serde(default = "default_remote_director")]
    pub director: String,
    /// Configuration file on the remote side.
    #[serde(default = "default_remote_config")]
    pub config: PathBuf,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_director() -> String {
    "director".to_string()
}

fn default_remote_config() -> PathBuf {
    PathBuf::from("director.toml")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub id: Id,
    pub arch: Id,
    #[serde(default)]
    pub cores: usize,
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub compilers: BTreeMap<String, Compiler>,
    /// Compile and run over ssh instead of locally.
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

impl MachineConfig {
    pub fn plan(&self) -> MachinePlan {
        let mut m = MachinePlan::new(self.id.clone(), self.arch.clone());
        m.cores = self.cores;
        m
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.machines.is_empty() {
            anyhow::bail!("no machines configured");
        }
        let mut ids = HashSet::new();
        for m in &self.machines {
            if m.id.is_empty() {
                anyhow::bail!("machine with empty id");
            }
            if !ids.insert(m.id.to_string()) {
                anyhow::bail!("duplicate machine: {}", m.id);
            }
            for (k, c) in &m.compilers {
                k.parse::<Id>()
                    .with_context(|| format!("bad compiler id '{}' on machine {}", k, m.id))?;
                if c.cmd.is_empty() {
                    anyhow::bail!("compiler {} on machine {} has no command", k, m.id);
                }
            }
            if let Some(ssh) = m.ssh.as_ref() {
                if ssh.host.is_empty() {
                    anyhow::bail!("machine {} has an empty ssh host", m.id);
                }
                if let Some(key) = ssh.key.as_ref() {
                    if !key.is_file() {
                        anyhow::bail!("bad ssh key for machine {}: {}", m.id, key.display());
                    }
                }
            }
        }
        if self.fuzz.cycles == 0 {
            anyhow::bail!("fuzz cycles must be positive");
        }
        for (name, t) in [("fuzzer", &self.tools.fuzzer), ("lifter", &self.tools.lifter)] {
            if t.cmd.is_empty() {
                anyhow::bail!("no command for the {}", name);
            }
        }
        Ok(())
    }

    pub fn machine(&self, id: &Id) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| &m.id == id)
    }

    /// Tool-backed services as configured.
    pub fn services(&self) -> Services {
        Services {
            fuzzer: Arc::new(CmdFuzzer(self.tools.fuzzer.tool())),
            maker: Arc::new(CmdHarnessMaker(self.tools.lifter.tool())),
            compiler: Arc::new(CmdCompiler),
            parser: Arc::new(HerdParser),
            runner: Arc::new(LocalRunner),
        }
    }

    pub fn catalog(&self) -> Catalog {
        Catalog {
            machines: self
                .machines
                .iter()
                .map(|m| (m.id.to_string(), m.clone()))
                .collect(),
        }
    }
}

/// Answers backend and compiler queries from the configuration.
#[derive(Debug, Clone)]
pub struct Catalog {
    machines: BTreeMap<String, MachineConfig>,
}

impl Catalog {
    fn get(&self, machine: &Id) -> anyhow::Result<&MachineConfig> {
        self.machines
            .get(&machine.to_string())
            .with_context(|| format!("unknown machine: {}", machine))
    }
}

impl BackendFinder for Catalog {
    fn find_backend(&self, machine: &Id, arch: &Id) -> anyhow::Result<Option<Backend>> {
        let m = self.get(machine)?;
        let fits = &m.arch == arch || m.compilers.values().any(|c| &c.arch == arch);
        Ok(if fits { m.backend.clone() } else { None })
    }
}

impl CompilerLister for Catalog {
    fn list_compilers(&self, machine: &Id) -> anyhow::Result<BTreeMap<String, Compiler>> {
        Ok(self.get(machine)?.compilers.clone())
    }
}
