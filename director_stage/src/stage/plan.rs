//! Planning: the first stage, which turns litmus files into a plan.

use super::bound;
use crate::services::{BackendFinder, CompilerLister};
use anyhow::Context as _;
use director_core::{
    builder::{self, ObserverRef, Request},
    corpus::Corpus,
    ctx::Context,
    par::par_build,
    plan::{MachinePlan, Plan, Stage},
    subject::{Named, Subject},
    RngType,
};
use rand::{Rng, SeedableRng};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::Arc,
};

pub struct PlanStage {
    pub finder: Arc<dyn BackendFinder>,
    pub lister: Arc<dyn CompilerLister>,
    /// Machines to plan for; backends and compilers are filled in.
    pub machines: Vec<MachinePlan>,
    /// Seed of the new plan; random if `None`.
    pub seed: Option<i64>,
    pub workers: usize,
    pub observers: Vec<ObserverRef>,
}

impl PlanStage {
    pub fn plan(&self, ctx: &Context, inputs: &[PathBuf]) -> anyhow::Result<Plan> {
        if inputs.is_empty() {
            anyhow::bail!("no litmus tests to plan");
        }
        if self.machines.is_empty() {
            anyhow::bail!("no machines to plan for");
        }

        let seed = self
            .seed
            .unwrap_or_else(|| RngType::from_entropy().gen());
        let mut plan = Plan::new(seed);
        for m in &self.machines {
            let mut m = m.clone();
            m.compilers = self
                .lister
                .list_compilers(&m.id)
                .with_context(|| format!("failed to list compilers of {}", m.id))?;
            m.backend = self
                .finder
                .find_backend(&m.id, &m.arch)
                .with_context(|| format!("failed to find a backend for {}", m.id))?;
            if m.backend.is_none() {
                log::warn!("{}: no backend for arch {}", m.id, m.arch);
            }
            log::info!("{}: {} compilers", m.id, m.compilers.len());
            plan.add_machine(m);
        }

        let named = inputs
            .iter()
            .map(|p| -> anyhow::Result<Named> { Ok(Named::new(subject_name(p)?, Subject::new(p))) })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let src = Corpus::from_named(named).context("litmus file names must be unique")?;
        let config = builder::Config::new("plan", src.len()).observers(&self.observers);
        plan.corpus = par_build(ctx, bound(self.workers), &src, config, |ctx, mut n, tx| -> anyhow::Result<()> {
            n.subject.threads = probe_threads(&n.subject.litmus)
                .with_context(|| format!("failed to read {}", n.subject.litmus.display()))?;
            ctx.send(tx, Request::add(n))?;
            Ok(())
        })?;
        plan.record_stage(Stage::Plan);
        Ok(plan)
    }
}

/// File stem of a litmus path.
fn subject_name(p: &Path) -> anyhow::Result<String> {
    p.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("no subject name in {}", p.display()))
}

/// Number of threads declared by the `P0 | P1 | ...` header of a litmus test.
pub fn probe_threads(path: &Path) -> std::io::Result<usize> {
    let text = read_to_string(path)?;
    Ok(text.lines().find_map(thread_header).unwrap_or(0))
}

fn thread_header(line: &str) -> Option<usize> {
    let cols = line
        .trim()
        .trim_end_matches(';')
        .split('|')
        .map(str::trim)
        .collect::<Vec<_>>();
    let is_thread = |c: &&str| {
        c.strip_prefix('P')
            .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    };
    if cols.iter().all(is_thread) {
        Some(cols.len())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_core::{
        id::Id,
        plan::{Backend, Compiler},
    };
    use std::{collections::BTreeMap, fs};

    struct Fixed;

    impl BackendFinder for Fixed {
        fn find_backend(&self, _: &Id, arch: &Id) -> anyhow::Result<Option<Backend>> {
            Ok(Some(Backend {
                id: "herd".parse()?,
                style: arch.clone(),
            }))
        }
    }

    impl CompilerLister for Fixed {
        fn list_compilers(&self, _: &Id) -> anyhow::Result<BTreeMap<String, Compiler>> {
            let mut m = BTreeMap::new();
            m.insert(
                "gcc".to_string(),
                Compiler {
                    style: "gcc".parse()?,
                    arch: "x86.64".parse()?,
                    cmd: "gcc".to_string(),
                    args: Vec::new(),
                    opt: None,
                    mopt: None,
                },
            );
            Ok(m)
        }
    }

    const SB: &str = "C SB
{ x = 0; y = 0; }
 P0          | P1          ;
 MOV [x],$1  | MOV [y],$1  ;
 MOV EAX,[y] | MOV EAX,[x] ;
exists (0:EAX=0 /\\ 1:EAX=0)
";

    fn stage(seed: Option<i64>) -> PlanStage {
        PlanStage {
            finder: Arc::new(Fixed),
            lister: Arc::new(Fixed),
            machines: vec![MachinePlan::new(
                "localhost".parse().unwrap(),
                "x86.64".parse().unwrap(),
            )],
            seed,
            workers: 2,
            observers: Vec::new(),
        }
    }

    #[test]
    fn thread_header_detection() {
        assert_eq!(thread_header(" P0          | P1          ;"), Some(2));
        assert_eq!(thread_header("P0;"), Some(1));
        assert_eq!(thread_header(" MOV [x],$1  | MOV [y],$1  ;"), None);
        assert_eq!(thread_header("P | P1"), None);
    }

    #[test]
    fn plans_every_litmus_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = Vec::new();
        for name in ["sb", "mp", "lb"] {
            let p = dir.path().join(format!("{}.litmus", name));
            fs::write(&p, SB).unwrap();
            inputs.push(p);
        }
        let plan = stage(Some(7)).plan(&Context::background(), &inputs).unwrap();

        assert_eq!(plan.metadata.seed, 7);
        assert!(plan.has_stage(Stage::Plan));
        assert_eq!(plan.corpus.names(), vec!["lb", "mp", "sb"]);
        for (_, s) in &plan.corpus {
            assert_eq!(s.threads, 2);
        }
        let m = plan.machine().unwrap();
        assert_eq!(m.backend.as_ref().unwrap().id.to_string(), "herd");
        assert_eq!(m.compilers.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::create_dir(&a).unwrap();
        fs::write(a.join("sb.litmus"), SB).unwrap();
        fs::write(dir.path().join("sb.litmus"), SB).unwrap();
        let inputs = vec![a.join("sb.litmus"), dir.path().join("sb.litmus")];
        assert!(stage(None).plan(&Context::background(), &inputs).is_err());
    }

    #[test]
    fn unreadable_input_fails_the_stage() {
        let inputs = vec![PathBuf::from("/nonexistent/director/sb.litmus")];
        assert!(stage(None).plan(&Context::background(), &inputs).is_err());
    }
}
