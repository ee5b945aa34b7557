//! Bucketing a finished corpus by outcome.
//!
//! Each subject gets a bitmask built from all of its compile and run results,
//! and goes into every bucket whose bit is set. Buckets overlap: a subject that
//! failed to compile with one compiler and was flagged with another is in both
//! `compile_failures` and `flagged`. Only a subject with no bad bit at all is a
//! success.

use crate::{
    corpus::{Corpus, CorpusError},
    ctx::{Context, CtxError},
    status::Status,
    subject::{Named, Subject},
};
use crossbeam_channel as chan;
use std::{fmt, thread};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollateError {
    #[error(transparent)]
    Ctx(#[from] CtxError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

const FLAGGED: u8 = 1;
const COMPILE_FAIL: u8 = 1 << 1;
const COMPILE_TIMEOUT: u8 = 1 << 2;
const RUN_FAIL: u8 = 1 << 3;
const RUN_TIMEOUT: u8 = 1 << 4;

fn status_bit(s: Status) -> u8 {
    match s {
        Status::Flagged => FLAGGED,
        Status::CompileFail => COMPILE_FAIL,
        Status::CompileTimeout => COMPILE_TIMEOUT,
        Status::RunFail => RUN_FAIL,
        Status::RunTimeout => RUN_TIMEOUT,
        Status::Unknown | Status::Ok => 0,
    }
}

/// Outcome bits of one subject across all compilers.
pub fn classify(s: &Subject) -> u8 {
    let compiles = s.compiles.values().map(|c| status_bit(c.status()));
    let runs = s.runs.values().map(|r| status_bit(r.status));
    compiles.chain(runs).fold(0, |acc, b| acc | b)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collation {
    pub successes: Corpus,
    pub flagged: Corpus,
    pub compile_failures: Corpus,
    pub compile_timeouts: Corpus,
    pub run_failures: Corpus,
    pub run_timeouts: Corpus,
}

impl Collation {
    fn buckets(&self) -> [(&'static str, &Corpus); 6] {
        [
            ("successes", &self.successes),
            ("flagged", &self.flagged),
            ("compile failures", &self.compile_failures),
            ("compile timeouts", &self.compile_timeouts),
            ("run failures", &self.run_failures),
            ("run timeouts", &self.run_timeouts),
        ]
    }

    fn insert(&mut self, flags: u8, n: Named) -> Result<(), CorpusError> {
        if flags == 0 {
            return self.successes.add(n);
        }
        let targets = [
            (FLAGGED, &mut self.flagged),
            (COMPILE_FAIL, &mut self.compile_failures),
            (COMPILE_TIMEOUT, &mut self.compile_timeouts),
            (RUN_FAIL, &mut self.run_failures),
            (RUN_TIMEOUT, &mut self.run_timeouts),
        ];
        for (bit, bucket) in targets {
            if flags & bit != 0 {
                bucket.add(n.clone())?;
            }
        }
        Ok(())
    }

    /// Per-bucket counts, e.g. for a log line.
    pub fn summary(&self) -> Vec<(&'static str, usize)> {
        self.buckets().iter().map(|(k, c)| (*k, c.len())).collect()
    }

    /// Whether anything landed outside `successes`.
    pub fn has_problems(&self) -> bool {
        self.buckets()[1..].iter().any(|(_, c)| !c.is_empty())
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .summary()
            .into_iter()
            .map(|(k, n)| format!("{}: {}", k, n))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(", "))
    }
}

/// Classify every subject of `corpus` with up to `workers` threads.
pub fn collate(ctx: &Context, corpus: &Corpus, workers: usize) -> Result<Collation, CollateError> {
    let (tx, rx) = chan::unbounded::<(u8, Named)>();
    thread::scope(|s| {
        let collector = s.spawn(move || {
            let mut c = Collation::default();
            let mut err = None;
            // Drain everything so that no classifier blocks on a full channel.
            for (flags, n) in rx {
                if err.is_none() {
                    err = c.insert(flags, n).err();
                }
            }
            err.map_or(Ok(c), Err)
        });
        let classified = corpus.par(ctx, workers, |ctx, n| {
            let flags = classify(&n.subject);
            ctx.send(&tx, (flags, n)).map_err(CollateError::from)
        });
        drop(tx);
        let collated = collector.join().unwrap_or_else(|p| std::panic::resume_unwind(p));
        classified?;
        Ok(collated?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        id::Id,
        subject::{CompileResult, RunResult},
    };

    fn id(s: &str) -> Id {
        s.parse().unwrap()
    }

    fn compiled(success: bool) -> CompileResult {
        CompileResult {
            success,
            ..CompileResult::default()
        }
    }

    fn mixed() -> Corpus {
        let mut c = Corpus::new();
        c.add(Named::new("empty", Subject::new("empty.litmus"))).unwrap();

        let mut good = Subject::new("good.litmus");
        good.add_compile(&id("gcc"), compiled(true)).unwrap();
        good.add_run(&id("gcc"), RunResult::with_status(Status::Ok)).unwrap();
        c.add(Named::new("good", good)).unwrap();

        let mut both = Subject::new("both.litmus");
        both.add_compile(&id("gcc"), compiled(false)).unwrap();
        both.add_compile(&id("clang"), compiled(true)).unwrap();
        both.add_run(&id("gcc"), RunResult::with_status(Status::CompileFail))
            .unwrap();
        both.add_run(&id("clang"), RunResult::with_status(Status::Flagged))
            .unwrap();
        c.add(Named::new("both", both)).unwrap();

        let mut slow = Subject::new("slow.litmus");
        slow.add_compile(
            &id("gcc"),
            CompileResult {
                success: false,
                timed_out: true,
                ..CompileResult::default()
            },
        )
        .unwrap();
        slow.add_compile(&id("clang"), compiled(true)).unwrap();
        slow.add_run(&id("gcc"), RunResult::with_status(Status::CompileTimeout))
            .unwrap();
        slow.add_run(&id("clang"), RunResult::with_status(Status::RunTimeout))
            .unwrap();
        c.add(Named::new("slow", slow)).unwrap();

        let mut crash = Subject::new("crash.litmus");
        crash.add_run(&id("gcc"), RunResult::with_status(Status::RunFail)).unwrap();
        c.add(Named::new("crash", crash)).unwrap();
        c
    }

    #[test]
    fn buckets_overlap_and_suppress_success() {
        let c = collate(&Context::background(), &mixed(), 3).unwrap();
        assert_eq!(c.successes.names(), vec!["empty", "good"]);
        assert_eq!(c.flagged.names(), vec!["both"]);
        assert_eq!(c.compile_failures.names(), vec!["both"]);
        assert_eq!(c.compile_timeouts.names(), vec!["slow"]);
        assert_eq!(c.run_failures.names(), vec!["crash"]);
        assert_eq!(c.run_timeouts.names(), vec!["slow"]);
        assert!(c.has_problems());
    }

    #[test]
    fn collating_is_idempotent() {
        let corpus = mixed();
        let a = collate(&Context::background(), &corpus, 0).unwrap();
        let b = collate(&Context::background(), &corpus, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn summary_counts_buckets() {
        let c = collate(&Context::background(), &mixed(), 0).unwrap();
        assert_eq!(c.summary()[0], ("successes", 2));
        assert_eq!(
            c.to_string(),
            "successes: 2, flagged: 1, compile failures: 1, compile timeouts: 1, \
             run failures: 1, run timeouts: 1"
        );
    }

    #[test]
    fn cancelled_context_fails() {
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(
            collate(&ctx, &mixed(), 0),
            Err(CollateError::Ctx(CtxError::Canceled))
        ));
    }
}
