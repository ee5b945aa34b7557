//! Cancellation contexts.
//!
//! A [`Context`] is a cloneable handle that is either live or done. It becomes
//! done when cancelled, when its deadline passes, or when its parent becomes
//! done. Blocking channel operations go through [`Context::send`] and
//! [`Context::recv`] so that no thread stays parked on a channel that a
//! cancelled stage will never service.

use crossbeam_channel::{self as chan, select, Receiver, Sender};
use std::{
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CtxError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    deadline: Option<Instant>,
    /// Disconnected once the context is done.
    done_rx: Receiver<()>,
    state: Mutex<State>,
}

struct State {
    done_tx: Option<Sender<()>>,
    err: Option<CtxError>,
    children: Vec<Weak<Inner>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.inner.state.lock().unwrap().err)
            .finish()
    }
}

impl Context {
    /// A root context that is never done unless cancelled.
    pub fn background() -> Self {
        Self::with_parts(None)
    }

    fn with_parts(deadline: Option<Instant>) -> Self {
        let (done_tx, done_rx) = chan::bounded(0);
        Context {
            inner: Arc::new(Inner {
                deadline,
                done_rx,
                state: Mutex::new(State {
                    done_tx: Some(done_tx),
                    err: None,
                    children: Vec::new(),
                }),
            }),
        }
    }

    /// Child context that can be cancelled independently of `self`.
    pub fn with_cancel(&self) -> Context {
        self.child(self.inner.deadline)
    }

    /// Child context that expires at `deadline` at the latest.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.inner.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        };
        self.child(Some(deadline))
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    fn child(&self, deadline: Option<Instant>) -> Context {
        let child = Self::with_parts(deadline);
        let parent_err = {
            let mut state = self.inner.state.lock().unwrap();
            if state.err.is_none() {
                state.children.retain(|c| c.strong_count() != 0);
                state.children.push(Arc::downgrade(&child.inner));
            }
            state.err
        };
        if let Some(e) = parent_err {
            child.cancel_with(e);
        }
        child
    }

    pub fn cancel(&self) {
        self.cancel_with(CtxError::Canceled)
    }

    fn cancel_with(&self, err: CtxError) {
        let children = {
            let mut state = self.inner.state.lock().unwrap();
            if state.err.is_some() {
                return;
            }
            state.err = Some(err);
            state.done_tx = None;
            std::mem::take(&mut state.children)
        };
        for c in children.iter().filter_map(Weak::upgrade) {
            Context { inner: c }.cancel_with(err);
        }
    }

    /// Why the context is done, or `None` while it is live.
    pub fn err(&self) -> Option<CtxError> {
        let err = self.inner.state.lock().unwrap().err;
        if err.is_some() {
            return err;
        }
        match self.inner.deadline {
            Some(d) if Instant::now() >= d => {
                self.cancel_with(CtxError::DeadlineExceeded);
                self.inner.state.lock().unwrap().err
            }
            _ => None,
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Channel that disconnects once the context is cancelled. Deadline
    /// expiry is observed through [`Context::deadline_rx`].
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }

    /// Channel that fires at the deadline, or never.
    pub fn deadline_rx(&self) -> Receiver<Instant> {
        match self.inner.deadline {
            Some(d) => chan::at(d),
            None => chan::never(),
        }
    }

    /// Error to report after a select saw the done or deadline channel fire.
    pub fn expired(&self) -> CtxError {
        self.err().unwrap_or(CtxError::Canceled)
    }

    /// Receive from `rx`, giving up when the context is done. `Ok(None)` means
    /// every sender has gone away.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Result<Option<T>, CtxError> {
        if let Some(e) = self.err() {
            return Err(e);
        }
        let deadline = self.deadline_rx();
        select! {
            recv(rx) -> msg => Ok(msg.ok()),
            recv(self.done()) -> _ => Err(self.expired()),
            recv(deadline) -> _ => Err(self.expired()),
        }
    }

    /// Send `v` over `tx`, giving up when the context is done. A receiver
    /// that went away counts as cancellation: nobody will ever take the value.
    pub fn send<T>(&self, tx: &Sender<T>, v: T) -> Result<(), CtxError> {
        if let Some(e) = self.err() {
            return Err(e);
        }
        let deadline = self.deadline_rx();
        select! {
            send(tx, v) -> r => r.map_err(|_| CtxError::Canceled),
            recv(self.done()) -> _ => Err(self.expired()),
            recv(deadline) -> _ => Err(self.expired()),
        }
    }

    /// Sleep for `d` or until the context is done, whichever is first.
    pub fn sleep(&self, d: Duration) -> Result<(), CtxError> {
        let timer = chan::after(d);
        let deadline = self.deadline_rx();
        select! {
            recv(timer) -> _ => self.err().map_or(Ok(()), Err),
            recv(self.done()) -> _ => Err(self.expired()),
            recv(deadline) -> _ => Err(self.expired()),
        }
    }
}
