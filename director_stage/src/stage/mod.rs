//! The pipeline stages.
//!
//! Every stage has the same shape: check the incoming plan, work out how many
//! builder requests the job will send, run [`par_build`] with a per-subject
//! job and put the resulting corpus back into the plan.
//!
//! [`par_build`]: director_core::par::par_build

pub mod compile;
pub mod fuzz;
pub mod lift;
pub mod plan;
pub mod run;

pub use self::{compile::CompileStage, fuzz::FuzzStage, lift::LiftStage, plan::PlanStage, run::RunStage};

use crate::{config::Config, pathset::Pathset, services::Services};
use director_core::{
    builder::ObserverRef,
    ctx::Context,
    plan::{Plan, Stage as StageId},
};
use std::time::Instant;

pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    fn run(&self, ctx: &Context, plan: Plan) -> anyhow::Result<Plan>;
}

/// Concurrency bound for `workers` configured workers: 0 means one at a time.
pub fn bound(workers: usize) -> usize {
    workers.max(1)
}

/// Stages run one after another, each on the previous one's output.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, s: Box<dyn Stage>) {
        self.stages.push(s);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(&self, ctx: &Context, mut plan: Plan) -> anyhow::Result<Plan> {
        for s in &self.stages {
            let start = Instant::now();
            machine_info!("stage {} on {} subjects...", s.id(), plan.corpus.len());
            plan = s.run(ctx, plan)?;
            machine_info!(
                "stage {} done in {}ms, {} subjects",
                s.id(),
                start.elapsed().as_millis(),
                plan.corpus.len()
            );
        }
        Ok(plan)
    }
}

/// What it takes to build any stage.
#[derive(Clone)]
pub struct StageKit<'a> {
    pub config: &'a Config,
    pub services: &'a Services,
    pub paths: Pathset,
    pub observers: Vec<ObserverRef>,
}

impl<'a> StageKit<'a> {
    /// The stage that transforms an existing plan, if `id` names one.
    pub fn build(&self, id: StageId) -> Option<Box<dyn Stage>> {
        let c = self.config;
        let s = self.services;
        let obs = self.observers.clone();
        let stage: Box<dyn Stage> = match id {
            StageId::Fuzz => Box::new(FuzzStage {
                fuzzer: s.fuzzer.clone(),
                paths: self.paths.clone(),
                cycles: c.fuzz.cycles,
                corpus_size: c.fuzz.corpus_size,
                workers: c.workers.fuzz,
                observers: obs,
            }),
            StageId::Lift => Box::new(LiftStage {
                maker: s.maker.clone(),
                paths: self.paths.clone(),
                workers: c.workers.lift,
                observers: obs,
            }),
            StageId::Compile => Box::new(CompileStage {
                compiler: s.compiler.clone(),
                paths: self.paths.clone(),
                timeout: c.timeouts.compile(),
                workers: c.workers.compile,
                observers: obs,
            }),
            StageId::Run => Box::new(RunStage {
                runner: s.runner.clone(),
                parser: s.parser.clone(),
                timeout: c.timeouts.run(),
                workers: c.workers.run,
                observers: obs,
            }),
            StageId::Plan | StageId::Collate => return None,
        };
        Some(stage)
    }

    /// Fuzz, lift, compile and run, in that order.
    pub fn pipeline(&self) -> Pipeline {
        let mut p = Pipeline::new();
        for id in [
            StageId::Fuzz,
            StageId::Lift,
            StageId::Compile,
            StageId::Run,
        ] {
            if let Some(s) = self.build(id) {
                p.push(s);
            }
        }
        p
    }
}
