use director_core::{
    builder::{Message, Observer, RequestKind},
    ctx::Context,
};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Counts builder progress across every stage that reports to it.
#[derive(Debug, Default)]
pub struct Stats {
    batches: AtomicU64,
    finished: AtomicU64,
    expected: AtomicU64,
    adds: AtomicU64,
    harnesses: AtomicU64,
    compiles: AtomicU64,
    runs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub batches: u64,
    pub finished: u64,
    pub expected: u64,
    pub adds: u64,
    pub harnesses: u64,
    pub compiles: u64,
    pub runs: u64,
}

impl Snapshot {
    pub fn steps(&self) -> u64 {
        self.adds + self.harnesses + self.compiles + self.runs
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            batches: self.batches.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            expected: self.expected.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            harnesses: self.harnesses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
        }
    }

    /// Log a progress line every `duration` until `ctx` is done.
    pub fn report(&self, ctx: &Context, duration: Duration) {
        while ctx.sleep(duration).is_ok() {
            let s = self.snapshot();
            log::info!(
                "steps: {}/{}, batches: {}/{}, add/lift/compile/run: {}/{}/{}/{}",
                s.steps(),
                s.expected,
                s.finished,
                s.batches,
                s.adds,
                s.harnesses,
                s.compiles,
                s.runs
            );
        }
    }
}

impl Observer for Stats {
    fn on_build(&self, m: &Message) {
        match m {
            Message::Start(manifest) => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                self.expected
                    .fetch_add(manifest.n_reqs as u64, Ordering::Relaxed);
            }
            Message::Step { request, .. } => {
                let counter = match request.kind() {
                    RequestKind::Add => &self.adds,
                    RequestKind::Harness => &self.harnesses,
                    RequestKind::Compile => &self.compiles,
                    RequestKind::Run => &self.runs,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Message::End => {
                self.finished.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_core::{
        builder::{Manifest, Request},
        subject::{Named, Subject},
    };

    #[test]
    fn counts_messages() {
        let stats = Stats::new();
        stats.on_build(&Message::Start(Manifest {
            name: "plan".to_string(),
            n_reqs: 2,
        }));
        for (index, name) in ["a", "b"].iter().enumerate() {
            stats.on_build(&Message::Step {
                index,
                request: Request::add(Named::new(*name, Subject::new("x.litmus"))),
            });
        }
        stats.on_build(&Message::End);
        let s = stats.snapshot();
        assert_eq!((s.batches, s.finished, s.expected), (1, 1, 2));
        assert_eq!(s.adds, 2);
        assert_eq!(s.steps(), 2);
    }
}
