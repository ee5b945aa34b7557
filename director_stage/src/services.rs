//! The external tools each stage drives, as traits, plus the command-line
//! backed implementations used outside tests.

use crate::process::{self, ToolError};
use director_core::{
    ctx::Context,
    id::Id,
    plan::{Backend, Compiler},
    subject::{Fuzz, Observation},
};
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    io::{Read, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

/// Produces one fuzzed variant of a litmus test.
pub trait SingleFuzzer: Send + Sync {
    fn fuzz_single(&self, ctx: &Context, seed: i32, input: &Path, output: &Fuzz) -> Result<(), ToolError>;
}

/// Inputs of one lifting job.
#[derive(Debug, Clone, Copy)]
pub struct HarnessSpec<'a> {
    pub backend: &'a Backend,
    pub arch: &'a Id,
    pub input: &'a Path,
    pub output_dir: &'a Path,
}

/// Lifts a litmus test into compilable files; returns their names relative
/// to the output directory.
pub trait HarnessMaker: Send + Sync {
    fn make_harness(&self, ctx: &Context, spec: &HarnessSpec<'_>) -> Result<Vec<String>, ToolError>;
}

/// Compiles a harness. A compiler that runs and rejects its input reports
/// [`ToolError::Exit`]; one that cannot be started reports
/// [`ToolError::Spawn`].
pub trait SingleCompiler: Send + Sync {
    fn run_compiler(
        &self,
        ctx: &Context,
        compiler: &Compiler,
        inputs: &[PathBuf],
        output: &Path,
        errw: &mut dyn Write,
    ) -> Result<(), ToolError>;
}

/// Reads the observation a test binary prints.
pub trait ObsParser: Send + Sync {
    fn parse_obs(&self, ctx: &Context, backend: &Backend, r: &mut dyn Read) -> anyhow::Result<Observation>;
}

/// How a compiled test binary is invoked.
pub trait BinRunner: Send + Sync {
    fn command(&self, bin: &Path) -> Command;
}

pub trait BackendFinder: Send + Sync {
    /// Backend to use for tests on `arch` run by `machine`, if any fits.
    fn find_backend(&self, machine: &Id, arch: &Id) -> anyhow::Result<Option<Backend>>;
}

pub trait CompilerLister: Send + Sync {
    /// Compilers available on `machine`, keyed by compiler id.
    fn list_compilers(&self, machine: &Id) -> anyhow::Result<BTreeMap<String, Compiler>>;
}

/// Everything a stage may need to talk to.
#[derive(Clone)]
pub struct Services {
    pub fuzzer: Arc<dyn SingleFuzzer>,
    pub maker: Arc<dyn HarnessMaker>,
    pub compiler: Arc<dyn SingleCompiler>,
    pub parser: Arc<dyn ObsParser>,
    pub runner: Arc<dyn BinRunner>,
}

/// A program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub cmd: String,
    pub args: Vec<String>,
}

impl Tool {
    pub fn new<S: Into<String>>(cmd: S) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cmd);
        cmd.args(&self.args);
        cmd
    }
}

/// Fuzzer invoked as `<tool> -seed <n> -o <litmus> -trace-output <trace> <input>`.
pub struct CmdFuzzer(pub Tool);

impl SingleFuzzer for CmdFuzzer {
    fn fuzz_single(&self, ctx: &Context, seed: i32, input: &Path, output: &Fuzz) -> Result<(), ToolError> {
        let mut cmd = self.0.command();
        cmd.arg("-seed")
            .arg(seed.to_string())
            .arg("-o")
            .arg(&output.litmus)
            .arg("-trace-output")
            .arg(&output.trace)
            .arg(input);
        process::run_tool(ctx, cmd, None).map(drop)
    }
}

/// Lifter invoked as `<tool> -backend <id> -arch <arch> -o <dir> <input>`;
/// prints one produced file name per line.
pub struct CmdHarnessMaker(pub Tool);

impl HarnessMaker for CmdHarnessMaker {
    fn make_harness(&self, ctx: &Context, spec: &HarnessSpec<'_>) -> Result<Vec<String>, ToolError> {
        let mut cmd = self.0.command();
        cmd.arg("-backend")
            .arg(spec.backend.id.to_string())
            .arg("-arch")
            .arg(spec.arch.to_string())
            .arg("-o")
            .arg(spec.output_dir)
            .arg(spec.input);
        let out = process::run_tool(ctx, cmd, None)?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Runs a gcc-compatible compiler driver.
pub struct CmdCompiler;

impl CmdCompiler {
    pub fn command(compiler: &Compiler, inputs: &[PathBuf], output: &Path) -> Command {
        let mut cmd = Command::new(&compiler.cmd);
        cmd.args(&compiler.args);
        if let Some(opt) = compiler.opt.as_ref() {
            cmd.arg(format!("-O{}", opt));
        }
        if let Some(mopt) = compiler.mopt.as_ref() {
            cmd.arg(format!("-march={}", mopt));
        }
        cmd.arg("-o").arg(output);
        // Headers are pulled in by the sources that include them.
        cmd.args(inputs.iter().filter(|p| p.extension() != Some(OsStr::new("h"))));
        cmd
    }
}

impl SingleCompiler for CmdCompiler {
    fn run_compiler(
        &self,
        ctx: &Context,
        compiler: &Compiler,
        inputs: &[PathBuf],
        output: &Path,
        errw: &mut dyn Write,
    ) -> Result<(), ToolError> {
        let cmd = Self::command(compiler, inputs, output);
        process::run_tool(ctx, cmd, Some(errw)).map(drop)
    }
}

/// Runs test binaries directly on this machine.
pub struct LocalRunner;

impl BinRunner for LocalRunner {
    fn command(&self, bin: &Path) -> Command {
        Command::new(bin)
    }
}
