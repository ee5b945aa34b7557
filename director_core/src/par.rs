//! Fan-out/fan-in over corpora.
//!
//! [`group`] runs tasks on scoped threads under a shared child context; the
//! first task to fail records its error and cancels the others. [`par_build`]
//! uses two nested groups to run a [`Builder`] next to one worker per subject
//! of a source corpus.

use crate::{
    builder::{self, BuildError, Builder, Request},
    corpus::Corpus,
    ctx::{Context, CtxError},
    machine_log,
    subject::Named,
};
use crossbeam_channel::{self as chan, Receiver, Sender};
use std::{
    sync::{Arc, Mutex},
    thread::{self, Scope},
};

/// Handle for spawning tasks inside [`group`].
pub struct Group<'scope, 'env: 'scope, E> {
    scope: &'scope Scope<'scope, 'env>,
    ctx: Context,
    first: Arc<Mutex<Option<E>>>,
    /// In-flight tokens when the group has a concurrency limit.
    tokens: Option<(Sender<()>, Receiver<()>)>,
    interrupted: bool,
}

impl<'scope, 'env, E: Send + 'static> Group<'scope, 'env, E> {
    /// Context shared by every task of the group.
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Start `f` on a new thread, first waiting for a free slot if the group
    /// is limited. Returns false, without running `f`, once the group's
    /// context is done.
    pub fn spawn<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), E> + Send + 'scope,
    {
        let acquired = match &self.tokens {
            Some((tx, _)) => self.ctx.send(tx, ()).is_ok(),
            None => !self.ctx.is_done(),
        };
        if !acquired {
            self.interrupted = true;
            return false;
        }

        let ctx = self.ctx.clone();
        let first = Arc::clone(&self.first);
        let release = self.tokens.as_ref().map(|(_, rx)| rx.clone());
        let machine = machine_log::machine_id();
        self.scope.spawn(move || {
            machine_log::set_machine_id(machine);
            if let Err(e) = f(&ctx) {
                {
                    let mut slot = first.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
                ctx.cancel();
            }
            if let Some(rx) = release {
                let _ = rx.try_recv();
            }
        });
        true
    }
}

/// Run the tasks that `f` spawns and wait for all of them.
///
/// At most `limit` tasks run at once; 0 means no limit. Returns the first
/// task error, or `ctx`'s error if spawning stopped early because `ctx` was
/// done.
pub fn group<'env, E, F>(ctx: &Context, limit: usize, f: F) -> Result<(), E>
where
    E: From<CtxError> + Send + 'static,
    F: for<'scope> FnOnce(&mut Group<'scope, 'env, E>),
{
    let gctx = ctx.with_cancel();
    let first = Arc::new(Mutex::new(None));
    let interrupted = thread::scope(|s| {
        let mut g = Group {
            scope: s,
            ctx: gctx.clone(),
            first: Arc::clone(&first),
            tokens: if limit > 0 {
                Some(chan::bounded(limit))
            } else {
                None
            },
            interrupted: false,
        };
        f(&mut g);
        g.interrupted
    });
    gctx.cancel();

    let first = first.lock().unwrap().take();
    match first {
        Some(e) => Err(e),
        None if interrupted => Err(ctx.err().unwrap_or(CtxError::Canceled).into()),
        None => Ok(()),
    }
}

/// Build a corpus in parallel.
///
/// Starts a [`Builder`] from `config` and, next to it, runs `f` once per
/// entry of `src` with at most `limit` workers at a time. Each worker reports
/// its results as requests on the sender it is given. `config.n_reqs` must
/// equal the total number of requests the workers send: too few and the
/// builder waits until `ctx` is done, too many and the extra senders do.
pub fn par_build<E, F>(
    ctx: &Context,
    limit: usize,
    src: &Corpus,
    config: builder::Config,
    f: F,
) -> Result<Corpus, E>
where
    E: From<BuildError> + From<CtxError> + Send + 'static,
    F: Fn(&Context, Named, &Sender<Request>) -> Result<(), E> + Sync,
{
    let b = Builder::new(config)?;
    let tx = b.sender();
    // Keeps the channel connected after the builder stops, so that late
    // senders block until cancellation instead of racing its error.
    let _rx = b.receiver();
    let out = Mutex::new(None);

    let r: Result<(), E> = group(ctx, 0, |g| {
        let out = &out;
        let f = &f;
        g.spawn(move |ctx| {
            let corpus = b.run(ctx)?;
            *out.lock().unwrap() = Some(corpus);
            Ok(())
        });
        g.spawn(move |ctx| src.par(ctx, limit, |ctx, n| f(ctx, n, &tx)));
    });
    r?;

    let corpus = out.into_inner().unwrap();
    corpus.ok_or_else(|| CtxError::Canceled.into())
}
