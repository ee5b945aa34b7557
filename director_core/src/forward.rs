//! Relaying builder progress across a process boundary.
//!
//! A child process wraps its output stream in a [`ForwardObserver`], which
//! writes one JSON [`Forward`] per line. The parent feeds the stream into a
//! [`Replayer`], which hands each builder message to local observers and turns
//! a forwarded error into [`ReplayError::Remote`].

use crate::{
    builder::{notify, Message, Observer, ObserverRef},
    ctx::{Context, CtxError},
};
use serde_derive::{Deserialize, Serialize};
use std::{
    fmt::Display,
    io::{Read, Write},
    sync::Mutex,
};
use thiserror::Error;

/// One wire message. Exactly one field is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Message>,
}

impl Forward {
    pub fn error<E: Display + ?Sized>(e: &E) -> Self {
        Self {
            error: Some(format!("{:#}", e)),
            build: None,
        }
    }

    pub fn build(m: &Message) -> Self {
        Self {
            error: None,
            build: Some(m.clone()),
        }
    }
}

/// Observer that serialises everything it sees onto `W`.
pub struct ForwardObserver<W> {
    w: Mutex<W>,
}

impl<W: Write + Send> ForwardObserver<W> {
    pub fn new(w: W) -> Self {
        Self { w: Mutex::new(w) }
    }

    /// Send an unrecoverable error to the other side.
    pub fn forward_error<E: Display + ?Sized>(&self, e: &E) {
        // Nowhere left to report a failure to report.
        let _ = self.write(&Forward::error(e));
    }

    pub fn into_inner(self) -> W {
        self.w.into_inner().unwrap()
    }

    fn write(&self, f: &Forward) -> Result<(), serde_json::Error> {
        let mut w = self.w.lock().unwrap();
        serde_json::to_writer(&mut *w, f)?;
        w.write_all(b"\n").map_err(serde_json::Error::io)?;
        w.flush().map_err(serde_json::Error::io)
    }
}

impl<W: Write + Send> Observer for ForwardObserver<W> {
    fn on_build(&self, m: &Message) {
        if let Err(e) = self.write(&Forward::build(m)) {
            self.forward_error(&e);
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Ctx(#[from] CtxError),
    #[error("malformed forwarded message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("forwarded message carries nothing")]
    Empty,
    #[error("remote error: {0}")]
    Remote(String),
}

/// Reads forwarded messages and dispatches them to local observers.
pub struct Replayer<R> {
    r: R,
    observers: Vec<ObserverRef>,
}

impl<R: Read> Replayer<R> {
    pub fn new(r: R, observers: &[ObserverRef]) -> Self {
        Self {
            r,
            observers: observers.to_vec(),
        }
    }

    /// Replay until the stream ends.
    ///
    /// `ctx` is only checked between messages; a read blocked on a silent
    /// stream is not interrupted by cancellation.
    pub fn replay(self, ctx: &Context) -> Result<(), ReplayError> {
        let mut stream = serde_json::Deserializer::from_reader(self.r).into_iter::<Forward>();
        loop {
            if let Some(e) = ctx.err() {
                return Err(e.into());
            }
            let f = match stream.next() {
                None => return ctx.err().map_or(Ok(()), |e| Err(e.into())),
                Some(f) => f?,
            };
            match f {
                Forward {
                    error: Some(text), ..
                } => return Err(ReplayError::Remote(text)),
                Forward { build: Some(m), .. } => notify(&self.observers, &m),
                _ => return Err(ReplayError::Empty),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{Manifest, Request},
        id::Id,
        status::Status,
        subject::{CompileResult, Named, RunResult, Subject},
    };
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Message>>,
    }

    impl Observer for Recorder {
        fn on_build(&self, m: &Message) {
            self.seen.lock().unwrap().push(m.clone());
        }
    }

    fn events() -> Vec<Message> {
        let gcc: Id = "gcc.O3".parse().unwrap();
        vec![
            Message::Start(Manifest {
                name: "run".to_string(),
                n_reqs: 3,
            }),
            Message::Step {
                index: 0,
                request: Request::add(Named::new("foo", Subject::new("foo.litmus"))),
            },
            Message::Step {
                index: 1,
                request: Request::compile(
                    "foo",
                    gcc.clone(),
                    CompileResult {
                        success: true,
                        bin: Some("bin/foo".into()),
                        ..CompileResult::default()
                    },
                ),
            },
            Message::Step {
                index: 2,
                request: Request::run("foo", gcc, RunResult::with_status(Status::RunTimeout)),
            },
            Message::End,
        ]
    }

    fn forwarded(events: &[Message], err: Option<&str>) -> Vec<u8> {
        let fwd = ForwardObserver::new(Vec::new());
        for m in events {
            fwd.on_build(m);
        }
        if let Some(e) = err {
            fwd.forward_error(e);
        }
        fwd.into_inner()
    }

    #[test]
    fn events_survive_the_wire() {
        let bytes = forwarded(&events(), None);
        let rec = Arc::new(Recorder::default());
        let obs: ObserverRef = rec.clone();
        Replayer::new(&bytes[..], &[obs])
            .replay(&Context::background())
            .unwrap();
        assert_eq!(*rec.seen.lock().unwrap(), events());
    }

    #[test]
    fn errors_come_back_marked_remote() {
        let bytes = forwarded(&events()[..2], Some("gcc: not found"));
        let rec = Arc::new(Recorder::default());
        let obs: ObserverRef = rec.clone();
        let err = Replayer::new(&bytes[..], &[obs])
            .replay(&Context::background())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Remote(ref t) if t.contains("gcc: not found")));
        assert_eq!(err.to_string(), "remote error: gcc: not found");
        assert_eq!(rec.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_message_is_a_protocol_error() {
        let err = Replayer::new(&b"{}\n"[..], &[])
            .replay(&Context::background())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Empty));
    }

    #[test]
    fn cancelled_context_stops_replay() {
        let ctx = Context::background();
        ctx.cancel();
        let bytes = forwarded(&events(), None);
        let err = Replayer::new(&bytes[..], &[]).replay(&ctx).unwrap_err();
        assert!(matches!(err, ReplayError::Ctx(CtxError::Canceled)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Replayer::new(&b"not json"[..], &[])
            .replay(&Context::background())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Decode(_)));
    }

    /// Fails the first `fails` writes, then buffers.
    struct Flaky {
        fails: usize,
        out: Vec<u8>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fails > 0 {
                self.fails -= 1;
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.out.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_event_is_reported_as_an_error() {
        let fwd = ForwardObserver::new(Flaky {
            fails: 1,
            out: Vec::new(),
        });
        fwd.on_build(&Message::End);
        let bytes = fwd.into_inner().out;
        let err = Replayer::new(&bytes[..], &[])
            .replay(&Context::background())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Remote(ref t) if t.contains("disk full")), "{}", err);
    }

    #[test]
    fn dead_writer_is_survived() {
        let fwd = ForwardObserver::new(Flaky {
            fails: usize::MAX,
            out: Vec::new(),
        });
        for m in events() {
            fwd.on_build(&m);
        }
        fwd.forward_error("gone");
        assert!(fwd.into_inner().out.is_empty());
    }
}
