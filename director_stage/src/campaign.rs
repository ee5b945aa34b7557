//! A whole test campaign: every machine of a plan goes through its pipeline
//! in parallel, then gets collated.

use crate::{
    config::Config,
    machine_log::set_machine_id,
    pathset::Pathset,
    remote::{Invoker, RemoteStage},
    services::Services,
    stage::{bound, Pipeline, StageKit},
    stats::Stats,
};
use anyhow::Context as _;
use crossbeam_channel as chan;
use director_core::{
    builder::{ChannelObserver, Message, Observer, ObserverRef},
    collate::{collate, Collation},
    ctx::{Context, CtxError},
    fanin::FanIn,
    id::Id,
    par::group,
    plan::{self, Plan},
};
use std::{
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::{self, ScopedJoinHandle},
    time::Duration,
};

/// What one machine ended up with.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub machine: Id,
    pub plan: Plan,
    pub collation: Collation,
}

pub struct Campaign<'a> {
    pub config: &'a Config,
    pub services: &'a Services,
    pub stats: Arc<Stats>,
    /// Interval of progress lines; `None` keeps quiet.
    pub report_every: Option<Duration>,
}

impl<'a> Campaign<'a> {
    pub fn new(config: &'a Config, services: &'a Services) -> Self {
        Self {
            config,
            services,
            stats: Arc::new(Stats::new()),
            report_every: Some(Duration::from_secs(10)),
        }
    }

    /// Where a machine's files and results go.
    pub fn machine_dir(&self, machine: &Id) -> PathBuf {
        self.config.out_dir.join(machine.to_string())
    }

    pub fn run(&self, ctx: &Context, plan: Plan) -> anyhow::Result<Vec<Outcome>> {
        plan.confirm_stage(plan::Stage::Fuzz)?;
        let plans = plan.split_machines();
        if plans.is_empty() {
            anyhow::bail!("plan has no machines");
        }

        let stats = Arc::clone(&self.stats);
        let mut fanin = FanIn::with_capacity(plans.len(), move |i, m: Message| -> Result<(), CtxError> {
            stats.on_build(&m);
            if let Message::Start(manifest) = &m {
                log::debug!("machine #{}: {} with {} requests", i, manifest.name, manifest.n_reqs);
            }
            Ok(())
        });
        let mut jobs = Vec::with_capacity(plans.len());
        for p in plans {
            let (tx, rx) = chan::unbounded();
            fanin.add(rx);
            let obs: ObserverRef = Arc::new(ChannelObserver::new(tx));
            jobs.push((p, obs));
        }

        let outcomes = Mutex::new(Vec::new());
        let rctx = ctx.with_cancel();
        let r = thread::scope(|s| {
            let collector = s.spawn(|| fanin.run(ctx));
            if let Some(every) = self.report_every {
                let rctx = &rctx;
                s.spawn(move || self.stats.report(rctx, every));
            }

            let r: anyhow::Result<()> = group(ctx, 0, |g| {
                for (p, obs) in jobs {
                    let outcomes = &outcomes;
                    g.spawn(move |ctx| {
                        let out = self.run_machine(ctx, p, obs)?;
                        outcomes.lock().unwrap().push(out);
                        Ok(())
                    });
                }
            });
            // Every channel observer is gone with its pipeline, so the
            // collector is about to finish.
            join_collector(collector);
            rctx.cancel();
            r
        });
        r?;

        let mut outcomes = outcomes.into_inner().unwrap();
        outcomes.sort_by(|a, b| a.machine.cmp(&b.machine));
        Ok(outcomes)
    }

    fn run_machine(&self, ctx: &Context, plan: Plan, obs: ObserverRef) -> anyhow::Result<Outcome> {
        let machine = plan.machine()?.id.clone();
        set_machine_id(machine.to_string());
        let mc = self
            .config
            .machine(&machine)
            .with_context(|| format!("machine {} is not configured", machine))?;

        let kit = StageKit {
            config: self.config,
            services: self.services,
            paths: Pathset::new(self.machine_dir(&machine)),
            observers: vec![Arc::clone(&obs)],
        };
        let pipeline = match mc.ssh.as_ref() {
            None => kit.pipeline(),
            Some(ssh) => {
                let mut p = Pipeline::new();
                for id in [plan::Stage::Fuzz, plan::Stage::Lift] {
                    if let Some(s) = kit.build(id) {
                        p.push(s);
                    }
                }
                for id in [plan::Stage::Compile, plan::Stage::Run] {
                    p.push(Box::new(RemoteStage {
                        stage: id,
                        invoker: Invoker::Ssh(ssh.clone()),
                        observers: vec![Arc::clone(&obs)],
                    }));
                }
                p
            }
        };
        drop(kit);
        drop(obs);

        let plan = pipeline
            .run(ctx, plan)
            .with_context(|| format!("campaign failed on machine {}", machine))?;
        drop(pipeline);
        let collation = collate(ctx, &plan.corpus, bound(self.config.workers.collate))?;
        if collation.has_problems() {
            machine_warn!("problems found: {}", collation);
        } else {
            machine_info!("{}", collation);
        }
        Ok(Outcome {
            machine,
            plan,
            collation,
        })
    }

    /// Write each machine's final plan and collation summary.
    pub fn save(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        for o in outcomes {
            let dir = self.machine_dir(&o.machine);
            create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
            let plan_path = dir.join("plan.toml");
            o.plan
                .save(&plan_path)
                .with_context(|| format!("failed to save {}", plan_path.display()))?;
            save_summary(&dir.join("summary.txt"), &o.collation)?;
        }
        Ok(())
    }
}

fn join_collector(h: ScopedJoinHandle<'_, Result<(), CtxError>>) {
    let r = h.join().unwrap_or_else(|p| std::panic::resume_unwind(p));
    if let Err(e) = r {
        log::debug!("event collector stopped early: {}", e);
    }
}

/// Bucket counts followed by the names in every non-empty problem bucket.
pub fn render_summary(c: &Collation) -> String {
    let mut text = String::new();
    for (bucket, n) in c.summary() {
        text.push_str(&format!("{}: {}\n", bucket, n));
    }
    for (bucket, corpus) in [
        ("flagged", &c.flagged),
        ("compile failures", &c.compile_failures),
        ("compile timeouts", &c.compile_timeouts),
        ("run failures", &c.run_failures),
        ("run timeouts", &c.run_timeouts),
    ] {
        if !corpus.is_empty() {
            text.push_str(&format!("\n[{}]\n", bucket));
            for name in corpus.names() {
                text.push_str(&name);
                text.push('\n');
            }
        }
    }
    text
}

fn save_summary(path: &Path, c: &Collation) -> anyhow::Result<()> {
    write(path, render_summary(c)).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MachineConfig,
        stage::fakes::{compiler, CopyFuzzer, GrepParser, ScriptedCompiler, ShellRunner, TouchMaker},
    };
    use director_core::{
        corpus::Corpus,
        plan::{Backend, MachinePlan},
        status::Status,
        subject::{Named, Subject},
    };
    use std::fs;

    fn machine(id: &str) -> MachineConfig {
        let mut compilers = std::collections::BTreeMap::new();
        compilers.insert("good".to_string(), compiler("x86.64", "ok"));
        compilers.insert("bad".to_string(), compiler("x86.64", "reject"));
        MachineConfig {
            id: id.parse().unwrap(),
            arch: "x86.64".parse().unwrap(),
            cores: 1,
            backend: Some(Backend {
                id: "herd".parse().unwrap(),
                style: "herd".parse().unwrap(),
            }),
            compilers,
            ssh: None,
        }
    }

    fn setup(out: &Path) -> (Config, Services) {
        let mut config = Config::default();
        config.out_dir = out.to_path_buf();
        config.fuzz.cycles = 2;
        config.machines = vec![machine("alpha"), machine("beta")];
        let services = Services {
            fuzzer: Arc::new(CopyFuzzer::default()),
            maker: Arc::new(TouchMaker),
            compiler: Arc::new(ScriptedCompiler),
            parser: Arc::new(GrepParser),
            runner: Arc::new(ShellRunner("echo fine".to_string())),
        };
        (config, services)
    }

    fn planned(config: &Config) -> Plan {
        let mut p = Plan::new(11);
        for m in &config.machines {
            let mut mp: MachinePlan = m.plan();
            mp.backend = m.backend.clone();
            mp.compilers = m.compilers.clone();
            p.add_machine(mp);
        }
        p.corpus = Corpus::from_named(
            ["sb", "mp"]
                .iter()
                .map(|n| Named::new(*n, Subject::new(format!("{}.litmus", n)))),
        )
        .unwrap();
        p.record_stage(plan::Stage::Plan);
        p
    }

    #[test]
    fn every_machine_is_tested_and_collated() {
        let dir = tempfile::tempdir().unwrap();
        let (config, services) = setup(dir.path());
        let mut campaign = Campaign::new(&config, &services);
        campaign.report_every = None;

        let outcomes = campaign
            .run(&Context::background(), planned(&config))
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].machine.to_string(), "alpha");
        for o in &outcomes {
            assert!(o.plan.has_stage(plan::Stage::Run));
            assert_eq!(o.plan.corpus.len(), 4);
            // `bad` rejects everything, so every subject failed somewhere.
            assert_eq!(o.collation.compile_failures.len(), 4);
            assert!(o.collation.successes.is_empty());
            for (_, s) in &o.plan.corpus {
                assert_eq!(s.run(&"good".parse().unwrap()).unwrap().status, Status::Ok);
            }
        }
        let s = campaign.stats.snapshot();
        // Two machines, four batches each.
        assert_eq!((s.batches, s.finished), (8, 8));

        campaign.save(&outcomes).unwrap();
        let summary = fs::read_to_string(dir.path().join("beta").join("summary.txt")).unwrap();
        assert!(summary.starts_with("successes: 0\n"));
        assert!(summary.contains("[compile failures]\nmp_0\nmp_1\nsb_0\nsb_1\n"));
        assert!(Plan::load(&dir.path().join("alpha").join("plan.toml")).is_ok());
    }

    #[test]
    #[should_panic(expected = "collector blew up")]
    fn collector_panic_is_not_swallowed() {
        thread::scope(|s| {
            let h = s.spawn(|| -> Result<(), CtxError> { panic!("collector blew up") });
            join_collector(h);
        });
    }

    #[test]
    fn stopped_collector_is_tolerated() {
        thread::scope(|s| {
            let h = s.spawn(|| Err(CtxError::Canceled));
            join_collector(h);
        });
    }

    #[test]
    fn unplanned_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (config, services) = setup(dir.path());
        let campaign = Campaign::new(&config, &services);
        assert!(campaign.run(&Context::background(), Plan::new(1)).is_err());
    }
}
