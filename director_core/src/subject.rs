//! Test subjects and everything the pipeline learns about them.

use crate::{id::Id, status::Status};
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("duplicate compile result for compiler '{0}'")]
    DuplicateCompile(String),
    #[error("duplicate harness for arch '{0}'")]
    DuplicateHarness(String),
    #[error("duplicate run result for compiler '{0}'")]
    DuplicateRun(String),
    #[error("no compile result for compiler '{0}'")]
    MissingCompile(String),
    #[error("no harness for arch '{0}'")]
    MissingHarness(String),
    #[error("no run result for compiler '{0}'")]
    MissingRun(String),
}

/// Files written by one fuzzer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fuzz {
    pub litmus: PathBuf,
    pub trace: PathBuf,
}

/// Output of compiling one harness with one compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl CompileResult {
    pub fn status(&self) -> Status {
        if self.success {
            Status::Ok
        } else if self.timed_out {
            Status::CompileTimeout
        } else {
            Status::CompileFail
        }
    }
}

/// Compilable files lifted from a litmus test for one architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harness {
    pub dir: PathBuf,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Harness {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.dir.join(f)).collect()
    }
}

/// Verdict flags of an observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsFlags {
    #[serde(default, skip_serializing_if = "is_false")]
    pub sat: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unsat: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub undef: bool,
}

/// What running a compiled test binary told us.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub flags: ObsFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,
    #[serde(default)]
    pub witnesses: u64,
    #[serde(default)]
    pub counter_examples: u64,
}

impl Observation {
    /// `Flagged` if the postcondition could not be satisfied or the run hit
    /// undefined behaviour, `Ok` otherwise.
    pub fn status(&self) -> Status {
        if self.flags.unsat || self.flags.undef {
            Status::Flagged
        } else {
            Status::Ok
        }
    }
}

/// Result of running one compiled binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs: Option<Observation>,
}

impl RunResult {
    pub fn with_status(status: Status) -> Self {
        Self { status, obs: None }
    }
}

/// One litmus test and its accumulated artifacts. The result maps are keyed
/// by the string form of compiler/architecture ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub threads: usize,
    pub litmus: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzz: Option<Fuzz>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compiles: BTreeMap<String, CompileResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub harnesses: BTreeMap<String, Harness>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runs: BTreeMap<String, RunResult>,
}

impl Subject {
    pub fn new<P: Into<PathBuf>>(litmus: P) -> Self {
        Self {
            litmus: litmus.into(),
            ..Self::default()
        }
    }

    /// Fuzzed litmus if there is one, else the original.
    pub fn best_litmus(&self) -> &Path {
        self.fuzz
            .as_ref()
            .map(|f| f.litmus.as_path())
            .unwrap_or(&self.litmus)
    }

    pub fn add_compile(&mut self, compiler: &Id, r: CompileResult) -> Result<(), SubjectError> {
        insert_fresh(&mut self.compiles, compiler, r, SubjectError::DuplicateCompile)
    }

    pub fn compile(&self, compiler: &Id) -> Result<&CompileResult, SubjectError> {
        let key = compiler.to_string();
        self.compiles
            .get(&key)
            .ok_or(SubjectError::MissingCompile(key))
    }

    pub fn add_harness(&mut self, arch: &Id, h: Harness) -> Result<(), SubjectError> {
        insert_fresh(&mut self.harnesses, arch, h, SubjectError::DuplicateHarness)
    }

    pub fn harness(&self, arch: &Id) -> Result<&Harness, SubjectError> {
        let key = arch.to_string();
        self.harnesses
            .get(&key)
            .ok_or(SubjectError::MissingHarness(key))
    }

    pub fn add_run(&mut self, compiler: &Id, r: RunResult) -> Result<(), SubjectError> {
        insert_fresh(&mut self.runs, compiler, r, SubjectError::DuplicateRun)
    }

    pub fn run(&self, compiler: &Id) -> Result<&RunResult, SubjectError> {
        let key = compiler.to_string();
        self.runs.get(&key).ok_or(SubjectError::MissingRun(key))
    }
}

fn insert_fresh<T>(
    map: &mut BTreeMap<String, T>,
    id: &Id,
    v: T,
    dup: fn(String) -> SubjectError,
) -> Result<(), SubjectError> {
    use std::collections::btree_map::Entry;

    match map.entry(id.to_string()) {
        Entry::Occupied(e) => Err(dup(e.key().clone())),
        Entry::Vacant(e) => {
            e.insert(v);
            Ok(())
        }
    }
}

/// A subject together with its corpus name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named {
    pub name: String,
    pub subject: Subject,
}

impl Named {
    pub fn new<S: Into<String>>(name: S, subject: Subject) -> Self {
        Self {
            name: name.into(),
            subject,
        }
    }

    /// Name of the `cycle`-th fuzzed variant of this subject.
    pub fn fuzz_name(&self, cycle: usize) -> String {
        format!("{}_{}", self.name, cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcc() -> Id {
        "gcc.O3".parse().unwrap()
    }

    #[test]
    fn duplicate_inserts_are_rejected() {
        let mut s = Subject::new("foo.litmus");
        s.add_compile(&gcc(), CompileResult::default()).unwrap();
        let first = s.compiles.clone();
        let dup = CompileResult {
            success: true,
            ..CompileResult::default()
        };
        assert_eq!(
            s.add_compile(&gcc(), dup),
            Err(SubjectError::DuplicateCompile("gcc.O3".to_string()))
        );
        assert_eq!(s.compiles, first);

        s.add_run(&gcc(), RunResult::with_status(Status::Ok)).unwrap();
        assert!(s.add_run(&gcc(), RunResult::default()).is_err());
        assert_eq!(s.run(&gcc()).unwrap().status, Status::Ok);
    }

    #[test]
    fn missing_lookups() {
        let s = Subject::new("foo.litmus");
        let arch: Id = "x86.64".parse().unwrap();
        assert_eq!(
            s.harness(&arch),
            Err(SubjectError::MissingHarness("x86.64".to_string()))
        );
        assert!(s.compile(&gcc()).is_err());
    }

    #[test]
    fn best_litmus_prefers_fuzz() {
        let mut s = Subject::new("foo.litmus");
        assert_eq!(s.best_litmus(), Path::new("foo.litmus"));
        s.fuzz = Some(Fuzz {
            litmus: "foo_0.litmus".into(),
            trace: "foo_0.trace".into(),
        });
        assert_eq!(s.best_litmus(), Path::new("foo_0.litmus"));
    }

    #[test]
    fn compile_status() {
        let mut c = CompileResult::default();
        assert_eq!(c.status(), Status::CompileFail);
        c.timed_out = true;
        assert_eq!(c.status(), Status::CompileTimeout);
        c.success = true;
        assert_eq!(c.status(), Status::Ok);
    }
}
