//! Compiling: builds every harness with every compiler of the machine.

use super::{bound, Stage};
use crate::{
    pathset::{ensure_parent, Pathset},
    process::ToolError,
    services::SingleCompiler,
};
use anyhow::Context as _;
use director_core::{
    builder::{self, ObserverRef, Request},
    ctx::Context,
    id::Id,
    par::par_build,
    plan::{self, Compiler, Plan},
    subject::{CompileResult, Named},
};
use std::{fs::File, sync::Arc, time::Duration};

pub struct CompileStage {
    pub compiler: Arc<dyn SingleCompiler>,
    pub paths: Pathset,
    pub timeout: Option<Duration>,
    pub workers: usize,
    pub observers: Vec<ObserverRef>,
}

impl CompileStage {
    fn compile_one(&self, ctx: &Context, n: &Named, id: &Id, c: &Compiler) -> anyhow::Result<CompileResult> {
        let harness = n.subject.harness(&c.arch)?;
        let bin = self.paths.bin_path(id, &n.name);
        let log_path = self.paths.log_path(id, &n.name);
        ensure_parent(&bin).with_context(|| format!("failed to create {}", bin.display()))?;
        let mut log =
            File::create(&log_path).with_context(|| format!("failed to create {}", log_path.display()))?;

        let cctx = match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.with_cancel(),
        };
        let r = self
            .compiler
            .run_compiler(&cctx, c, &harness.paths(), &bin, &mut log);
        cctx.cancel();

        let mut result = CompileResult {
            log: Some(log_path),
            ..CompileResult::default()
        };
        match r {
            Ok(()) => {
                result.success = true;
                result.bin = Some(bin);
            }
            Err(ToolError::Exit { status, .. }) => {
                machine_trace!("{} rejected {}: {}", id, n.name, status);
            }
            Err(ToolError::Interrupted(_)) if !ctx.is_done() => {
                machine_trace!("{} timed out on {}", id, n.name);
                result.timed_out = true;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to compile {} with {}", n.name, id));
            }
        }
        Ok(result)
    }
}

impl Stage for CompileStage {
    fn id(&self) -> plan::Stage {
        plan::Stage::Compile
    }

    fn run(&self, ctx: &Context, mut plan: Plan) -> anyhow::Result<Plan> {
        plan.confirm_stage(plan::Stage::Compile)?;
        let machine = plan.machine()?;
        let compilers = machine
            .compilers()
            .map(|(id, c)| (id, c.clone()))
            .collect::<Vec<_>>();
        if compilers.is_empty() {
            anyhow::bail!("machine {} has no compilers", machine.id);
        }
        if plan.corpus.is_empty() {
            anyhow::bail!("nothing to compile: empty corpus");
        }

        let n_reqs = compilers.len() * plan.corpus.len();
        let config = builder::Config::new("compile", n_reqs)
            .init(plan.corpus.clone())
            .observers(&self.observers);
        let compiled = par_build(
            ctx,
            bound(self.workers),
            &plan.corpus,
            config,
            |ctx, n, tx| -> anyhow::Result<()> {
                for (id, c) in &compilers {
                    let result = self.compile_one(ctx, &n, id, c)?;
                    ctx.send(tx, Request::compile(&n.name, id.clone(), result))?;
                }
                Ok(())
            },
        )?;

        plan.corpus = compiled;
        plan.record_stage(plan::Stage::Compile);
        Ok(plan)
    }
}
