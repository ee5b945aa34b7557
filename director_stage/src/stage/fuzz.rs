//! Fuzzing: replaces every subject with `cycles` fuzzed variants and samples
//! the result down to the configured corpus size.

use super::{bound, Stage};
use crate::{pathset::Pathset, services::SingleFuzzer};
use anyhow::Context as _;
use director_core::{
    builder::{self, ObserverRef, Request},
    ctx::Context,
    par::par_build,
    plan::{self, Plan},
    subject::Named,
    RngType,
};
use rand::{Rng, SeedableRng};
use std::{collections::BTreeMap, fs::create_dir_all, sync::Arc};

pub struct FuzzStage {
    pub fuzzer: Arc<dyn SingleFuzzer>,
    pub paths: Pathset,
    /// Variants made from each subject.
    pub cycles: usize,
    /// 0 keeps every variant.
    pub corpus_size: usize,
    pub workers: usize,
    pub observers: Vec<ObserverRef>,
}

impl FuzzStage {
    fn fuzz_subject(
        &self,
        ctx: &Context,
        n: Named,
        seed: u64,
        tx: &crossbeam_channel::Sender<Request>,
    ) -> anyhow::Result<()> {
        let mut rng = RngType::seed_from_u64(seed);
        let input = n.subject.litmus.clone();
        for cycle in 0..self.cycles {
            let name = n.fuzz_name(cycle);
            let out = self.paths.fuzz_paths(&name);
            self.fuzzer
                .fuzz_single(ctx, rng.gen(), &input, &out)
                .with_context(|| format!("failed to fuzz {} (cycle {})", n.name, cycle))?;
            machine_trace!("fuzzed {} into {}", n.name, out.litmus.display());

            let mut subject = n.subject.clone();
            subject.fuzz = Some(out);
            ctx.send(tx, Request::add(Named::new(name, subject)))?;
        }
        Ok(())
    }
}

impl Stage for FuzzStage {
    fn id(&self) -> plan::Stage {
        plan::Stage::Fuzz
    }

    fn run(&self, ctx: &Context, mut plan: Plan) -> anyhow::Result<Plan> {
        plan.confirm_stage(plan::Stage::Fuzz)?;
        if plan.corpus.is_empty() {
            anyhow::bail!("nothing to fuzz: empty corpus");
        }
        let dir = self.paths.fuzz_dir();
        create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        // One seed per subject, drawn in name order, so the outcome does not
        // depend on which worker gets to a subject first.
        let mut rng = plan.rng();
        let seeds = plan
            .corpus
            .names()
            .into_iter()
            .map(|name| (name, rng.gen::<u64>()))
            .collect::<BTreeMap<_, _>>();

        let n_reqs = self.cycles * plan.corpus.len();
        let config = builder::Config::new("fuzz", n_reqs).observers(&self.observers);
        let fuzzed = par_build(
            ctx,
            bound(self.workers),
            &plan.corpus,
            config,
            |ctx, n, tx| -> anyhow::Result<()> {
                let seed = *seeds
                    .get(&n.name)
                    .with_context(|| format!("no seed for {}", n.name))?;
                self.fuzz_subject(ctx, n, seed, tx)
            },
        )?;
        machine_info!("fuzzed {} subjects into {}", plan.corpus.len(), fuzzed.len());

        plan.corpus = fuzzed
            .sample(&mut rng, self.corpus_size)
            .context("failed to sample the fuzzed corpus")?;
        // Later runs of the same plan must not replay this stream.
        plan.metadata.seed = rng.gen();
        plan.record_stage(plan::Stage::Fuzz);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::fakes::CopyFuzzer;
    use director_core::{corpus::Corpus, subject::Subject};

    fn plan(seed: i64) -> Plan {
        let mut p = Plan::new(seed);
        p.corpus = Corpus::from_named(
            ["foo", "bar", "baz"]
                .iter()
                .map(|n| Named::new(*n, Subject::new(format!("{}.litmus", n)))),
        )
        .unwrap();
        p.record_stage(plan::Stage::Plan);
        p
    }

    fn stage(fuzzer: Arc<CopyFuzzer>, root: &std::path::Path, corpus_size: usize) -> FuzzStage {
        FuzzStage {
            fuzzer,
            paths: Pathset::new(root),
            cycles: 2,
            corpus_size,
            workers: 2,
            observers: Vec::new(),
        }
    }

    #[test]
    fn fuzzes_then_samples() {
        let dir = tempfile::tempdir().unwrap();
        let fuzzer = Arc::new(CopyFuzzer::default());
        let out = stage(fuzzer.clone(), dir.path(), 3)
            .run(&Context::background(), plan(42))
            .unwrap();

        assert_eq!(fuzzer.seeds.lock().unwrap().len(), 6);
        assert_eq!(out.corpus.len(), 3);
        assert_ne!(out.metadata.seed, 42);
        assert!(out.has_stage(plan::Stage::Fuzz));
        for (name, s) in &out.corpus {
            let f = s.fuzz.as_ref().unwrap();
            assert!(f.litmus.is_file(), "{} was not written", name);
            assert_eq!(s.best_litmus(), f.litmus.as_path());
        }
    }

    #[test]
    fn same_seed_same_outcome() {
        let run = |seed| {
            let dir = tempfile::tempdir().unwrap();
            let fuzzer = Arc::new(CopyFuzzer::default());
            let out = stage(fuzzer.clone(), dir.path(), 3)
                .run(&Context::background(), plan(seed))
                .unwrap();
            let mut seeds = fuzzer.seeds.lock().unwrap().clone();
            seeds.sort_unstable();
            (out.corpus.names(), out.metadata.seed, seeds)
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn keeps_everything_without_a_size() {
        let dir = tempfile::tempdir().unwrap();
        let out = stage(Arc::new(CopyFuzzer::default()), dir.path(), 0)
            .run(&Context::background(), plan(1))
            .unwrap();
        assert_eq!(
            out.corpus.names(),
            vec!["bar_0", "bar_1", "baz_0", "baz_1", "foo_0", "foo_1"]
        );
    }

    #[test]
    fn needs_a_planned_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(Arc::new(CopyFuzzer::default()), dir.path(), 0);
        assert!(s.run(&Context::background(), Plan::new(1)).is_err());

        let mut empty = Plan::new(1);
        empty.record_stage(plan::Stage::Plan);
        assert!(s.run(&Context::background(), empty).is_err());
    }

    #[test]
    fn oversized_sample_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(Arc::new(CopyFuzzer::default()), dir.path(), 7);
        assert!(s.run(&Context::background(), plan(1)).is_err());
    }
}
