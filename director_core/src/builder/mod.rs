//! Single-writer corpus mutation.
//!
//! A [`Builder`] owns a corpus and a request channel. Any number of producer
//! threads clone the [`Sender`] and send requests; the one thread that calls
//! [`Builder::run`] applies them in the order they are received. Nothing else
//! touches the corpus while the builder runs.

pub mod observer;
pub mod request;

pub use observer::{notify, ChannelObserver, Manifest, Message, Observer, ObserverRef};
pub use request::{Request, RequestBody, RequestKind};

use crate::{
    corpus::{Corpus, CorpusError},
    ctx::{Context, CtxError},
    subject::{Named, Subject, SubjectError},
};
use crossbeam_channel::{self as chan, Receiver, Sender};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("builder needs a positive request count")]
    NoRequests,
    #[error(transparent)]
    Ctx(#[from] CtxError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("subject '{name}': {source}")]
    Subject {
        name: String,
        #[source]
        source: SubjectError,
    },
    #[error("request channel closed after {0} requests")]
    Closed(usize),
}

/// How to set up a [`Builder`].
#[derive(Default)]
pub struct Config {
    /// Corpus to start from; empty if `None`.
    pub init: Option<Corpus>,
    /// Exact number of requests producers will send.
    pub n_reqs: usize,
    /// Task name reported in the start manifest.
    pub name: String,
    pub observers: Vec<ObserverRef>,
}

impl Config {
    pub fn new<S: Into<String>>(name: S, n_reqs: usize) -> Self {
        Self {
            name: name.into(),
            n_reqs,
            ..Self::default()
        }
    }

    pub fn init(mut self, corpus: Corpus) -> Self {
        self.init = Some(corpus);
        self
    }

    pub fn observers(mut self, observers: &[ObserverRef]) -> Self {
        self.observers.extend(observers.iter().cloned());
        self
    }
}

pub struct Builder {
    corpus: Corpus,
    manifest: Manifest,
    observers: Vec<ObserverRef>,
    tx: Sender<Request>,
    rx: Receiver<Request>,
}

impl Builder {
    pub fn new(config: Config) -> Result<Self, BuildError> {
        if config.n_reqs == 0 {
            return Err(BuildError::NoRequests);
        }
        let (tx, rx) = chan::bounded(0);
        Ok(Self {
            corpus: config.init.unwrap_or_default(),
            manifest: Manifest {
                name: config.name,
                n_reqs: config.n_reqs,
            },
            observers: config.observers,
            tx,
            rx,
        })
    }

    /// Channel for producers. Sending more than the configured request count
    /// blocks until the sender's context is done.
    pub fn sender(&self) -> Sender<Request> {
        self.tx.clone()
    }

    pub(crate) fn receiver(&self) -> Receiver<Request> {
        self.rx.clone()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Consume exactly `n_reqs` requests and return the built corpus.
    ///
    /// Stops at the first bad request (duplicate add, unknown subject,
    /// duplicate result) or when `ctx` is done.
    pub fn run(mut self, ctx: &Context) -> Result<Corpus, BuildError> {
        notify(&self.observers, &Message::Start(self.manifest.clone()));
        for index in 0..self.manifest.n_reqs {
            let request = ctx.recv(&self.rx)?.ok_or(BuildError::Closed(index))?;
            self.apply(&request)?;
            notify(&self.observers, &Message::Step { index, request });
        }
        notify(&self.observers, &Message::End);
        Ok(self.corpus)
    }

    fn apply(&mut self, r: &Request) -> Result<(), BuildError> {
        let name = &r.name;
        match &r.body {
            RequestBody::Add(s) => {
                self.corpus.add(Named::new(name.clone(), s.clone()))?;
                Ok(())
            }
            RequestBody::Compile { compiler, result } => self
                .subject_mut(name)?
                .add_compile(compiler, result.clone())
                .map_err(|source| subject_err(name, source)),
            RequestBody::Harness { arch, harness } => self
                .subject_mut(name)?
                .add_harness(arch, harness.clone())
                .map_err(|source| subject_err(name, source)),
            RequestBody::Run { compiler, result } => self
                .subject_mut(name)?
                .add_run(compiler, result.clone())
                .map_err(|source| subject_err(name, source)),
        }
    }

    fn subject_mut(&mut self, name: &str) -> Result<&mut Subject, BuildError> {
        self.corpus
            .get_mut(name)
            .ok_or_else(|| CorpusError::Missing(name.to_string()).into())
    }
}

fn subject_err(name: &str, source: SubjectError) -> BuildError {
    BuildError::Subject {
        name: name.to_string(),
        source,
    }
}
