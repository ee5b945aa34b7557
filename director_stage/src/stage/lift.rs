//! Lifting: turns each subject's litmus test into a compilable harness, once
//! per architecture the machine's compilers target.

use super::{bound, Stage};
use crate::{
    pathset::Pathset,
    services::{HarnessMaker, HarnessSpec},
};
use anyhow::Context as _;
use director_core::{
    builder::{self, ObserverRef, Request},
    ctx::Context,
    par::par_build,
    plan::{self, Plan},
    subject::Harness,
};
use std::{fs::create_dir_all, sync::Arc};

pub struct LiftStage {
    pub maker: Arc<dyn HarnessMaker>,
    pub paths: Pathset,
    pub workers: usize,
    pub observers: Vec<ObserverRef>,
}

impl Stage for LiftStage {
    fn id(&self) -> plan::Stage {
        plan::Stage::Lift
    }

    fn run(&self, ctx: &Context, mut plan: Plan) -> anyhow::Result<Plan> {
        plan.confirm_stage(plan::Stage::Lift)?;
        let machine = plan.machine()?;
        let backend = machine
            .backend
            .clone()
            .with_context(|| format!("no backend for machine {}", machine.id))?;
        if plan.corpus.is_empty() {
            anyhow::bail!("nothing to lift: empty corpus");
        }
        let arches = machine.arches();
        if arches.is_empty() {
            anyhow::bail!("machine {} has no compilers to lift for", machine.id);
        }

        let n_reqs = arches.len() * plan.corpus.len();
        let config = builder::Config::new("lift", n_reqs)
            .init(plan.corpus.clone())
            .observers(&self.observers);
        let lifted = par_build(
            ctx,
            bound(self.workers),
            &plan.corpus,
            config,
            |ctx, n, tx| -> anyhow::Result<()> {
                let input = n.subject.best_litmus();
                for arch in &arches {
                    let dir = self.paths.harness_dir(arch, &n.name);
                    create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
                    let spec = HarnessSpec {
                        backend: &backend,
                        arch,
                        input,
                        output_dir: &dir,
                    };
                    let files = self
                        .maker
                        .make_harness(ctx, &spec)
                        .with_context(|| format!("failed to lift {} for {}", n.name, arch))?;
                    machine_trace!("lifted {} for {}: {} files", n.name, arch, files.len());
                    ctx.send(tx, Request::harness(&n.name, arch.clone(), Harness { dir, files }))?;
                }
                Ok(())
            },
        )?;

        plan.corpus = lifted;
        plan.record_stage(plan::Stage::Lift);
        Ok(plan)
    }
}
