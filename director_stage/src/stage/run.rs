//! Running: executes every compiled test binary and records what it observed.

use super::{bound, Stage};
use crate::{
    process::{self, ToolError},
    services::{BinRunner, ObsParser},
};
use anyhow::Context as _;
use director_core::{
    builder::{self, ObserverRef, Request},
    ctx::Context,
    id::Id,
    par::par_build,
    plan::{self, Backend, Plan},
    status::Status,
    subject::{Observation, RunResult},
};
use std::{
    io,
    path::Path,
    process::Stdio,
    sync::Arc,
    thread,
    time::Duration,
};

pub struct RunStage {
    pub runner: Arc<dyn BinRunner>,
    pub parser: Arc<dyn ObsParser>,
    pub timeout: Option<Duration>,
    pub workers: usize,
    pub observers: Vec<ObserverRef>,
}

impl RunStage {
    /// Run `bin` and turn the outcome into one status.
    ///
    /// A timeout wins over everything else, then a failing exit, then a bad
    /// observation. Failing to start or wait for the binary is an error, as
    /// is the parent context being done.
    fn run_bin(&self, ctx: &Context, backend: &Backend, bin: &Path) -> anyhow::Result<RunResult> {
        let rctx = match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.with_cancel(),
        };
        let mut cmd = self.runner.command(bin);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let name = process::program_name(&cmd);
        let mut child = process::spawn(&mut cmd)?;
        let stdout = child.stdout.take();

        let (waited, parsed) = thread::scope(|s| {
            let parser = s.spawn(|| -> anyhow::Result<Observation> {
                let mut out = stdout.context("test binary has no stdout")?;
                let obs = self.parser.parse_obs(&rctx, backend, &mut out);
                // Keep the pipe drained so the binary never blocks on it.
                let _ = io::copy(&mut out, &mut io::sink());
                obs
            });
            let waited = process::wait(&rctx, child, &name);
            let parsed = parser
                .join()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("observation parser panicked")));
            (waited, parsed)
        });
        rctx.cancel();

        if let Some(e) = ctx.err() {
            return Err(e.into());
        }
        let status = match waited {
            Err(ToolError::Interrupted(_)) => return Ok(RunResult::with_status(Status::RunTimeout)),
            Err(e) => return Err(e.into()),
            Ok(status) => status,
        };
        if !status.success() {
            machine_trace!("{} exited with {}", bin.display(), status);
            return Ok(RunResult::with_status(Status::RunFail));
        }
        let obs = parsed.with_context(|| format!("failed to parse the output of {}", bin.display()))?;
        Ok(RunResult {
            status: obs.status(),
            obs: Some(obs),
        })
    }
}

impl Stage for RunStage {
    fn id(&self) -> plan::Stage {
        plan::Stage::Run
    }

    fn run(&self, ctx: &Context, mut plan: Plan) -> anyhow::Result<Plan> {
        plan.confirm_stage(plan::Stage::Run)?;
        let machine = plan.machine()?;
        let backend = machine
            .backend
            .clone()
            .with_context(|| format!("no backend for machine {}", machine.id))?;
        let n_reqs = plan.corpus.iter().map(|(_, s)| s.compiles.len()).sum::<usize>();
        if n_reqs == 0 {
            anyhow::bail!("nothing to run: no compile results");
        }

        let config = builder::Config::new("run", n_reqs)
            .init(plan.corpus.clone())
            .observers(&self.observers);
        let ran = par_build(
            ctx,
            bound(self.workers),
            &plan.corpus,
            config,
            |ctx, n, tx| -> anyhow::Result<()> {
                for (key, cr) in &n.subject.compiles {
                    let id: Id = key.parse()?;
                    let result = match cr.bin.as_ref() {
                        Some(bin) if cr.success => self
                            .run_bin(ctx, &backend, bin)
                            .with_context(|| format!("failed to run {} built by {}", n.name, id))?,
                        _ => RunResult::with_status(match cr.status() {
                            Status::CompileTimeout => Status::CompileTimeout,
                            _ => Status::CompileFail,
                        }),
                    };
                    ctx.send(tx, Request::run(&n.name, id, result))?;
                }
                Ok(())
            },
        )?;

        plan.corpus = ran;
        plan.record_stage(plan::Stage::Run);
        Ok(plan)
    }
}
