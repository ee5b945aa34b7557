//! Multiplexing many channels into one handler.

use crate::ctx::{Context, CtxError};
use crossbeam_channel::{Receiver, Select};

/// Merges any number of receivers into calls of one handler.
///
/// The handler gets the index of the source channel (its registration order)
/// and the value. Its first error is sticky: later values are still drained
/// from their channels but no longer handled. Cancellation of the run context
/// is recorded the same way, so [`FanIn::run`] only returns once every channel
/// has been closed by its senders.
pub struct FanIn<T, E, F> {
    inputs: Vec<Receiver<T>>,
    handler: F,
    _err: std::marker::PhantomData<fn() -> E>,
}

enum Event<T> {
    Done,
    Closed(usize),
    Value(usize, T),
}

impl<T, E, F> FanIn<T, E, F>
where
    F: FnMut(usize, T) -> Result<(), E>,
    E: From<CtxError>,
{
    pub fn new(handler: F) -> Self {
        Self::with_capacity(0, handler)
    }

    pub fn with_capacity(cap: usize, handler: F) -> Self {
        Self {
            inputs: Vec::with_capacity(cap),
            handler,
            _err: std::marker::PhantomData,
        }
    }

    /// Register another input; returns the index its values are tagged with.
    pub fn add(&mut self, rx: Receiver<T>) -> usize {
        self.inputs.push(rx);
        self.inputs.len() - 1
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn run(mut self, ctx: &Context) -> Result<(), E> {
        let mut live = self.inputs.drain(..).enumerate().collect::<Vec<_>>();
        let done = ctx.done().clone();
        let deadline = ctx.deadline_rx();
        let mut watch_ctx = true;
        let mut err = None;

        while !live.is_empty() {
            let event = {
                let mut sel = Select::new();
                for (_, rx) in &live {
                    sel.recv(rx);
                }
                let ctx_ops = if watch_ctx {
                    Some((sel.recv(&done), sel.recv(&deadline)))
                } else {
                    None
                };
                let op = sel.select();
                let i = op.index();
                match ctx_ops {
                    Some((d, _)) if i == d => {
                        let _ = op.recv(&done);
                        Event::Done
                    }
                    Some((_, t)) if i == t => {
                        let _ = op.recv(&deadline);
                        Event::Done
                    }
                    _ => match op.recv(&live[i].1) {
                        Ok(v) => Event::Value(i, v),
                        Err(_) => Event::Closed(i),
                    },
                }
            };

            match event {
                Event::Done => {
                    watch_ctx = false;
                    if err.is_none() {
                        err = Some(ctx.expired().into());
                    }
                }
                Event::Closed(i) => {
                    live.remove(i);
                }
                Event::Value(i, v) => {
                    if err.is_none() {
                        err = (self.handler)(live[i].0, v).err();
                    }
                }
            }
        }
        err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::FanIn;
    use crate::ctx::{Context, CtxError};
    use crossbeam_channel as chan;
    use std::{thread, time::Duration};

    #[test]
    fn merges_every_input() {
        let mut seen = vec![Vec::new(); 3];
        let mut fan = FanIn::with_capacity(3, |i, v: u32| {
            seen[i].push(v);
            Ok::<(), CtxError>(())
        });
        let mut producers = Vec::new();
        for k in 0..3u32 {
            let (tx, rx) = chan::bounded(0);
            assert_eq!(fan.add(rx), k as usize);
            producers.push(thread::spawn(move || {
                for v in 0..10 {
                    tx.send(k * 100 + v).unwrap();
                }
            }));
        }
        fan.run(&Context::background()).unwrap();
        for p in producers {
            p.join().unwrap();
        }
        for (k, vs) in seen.iter().enumerate() {
            let want = (0..10).map(|v| k as u32 * 100 + v).collect::<Vec<_>>();
            assert_eq!(vs, &want);
        }
    }

    #[test]
    fn first_error_sticks_and_channels_drain() {
        let mut handled = 0;
        let (tx, rx) = chan::bounded(0);
        let mut fan = FanIn::new(|_, v: u32| {
            handled += 1;
            if v == 3 {
                Err(CtxError::DeadlineExceeded)
            } else {
                Ok(())
            }
        });
        fan.add(rx);
        let producer = thread::spawn(move || {
            for v in 0..10 {
                tx.send(v).unwrap();
            }
        });
        assert_eq!(
            fan.run(&Context::background()),
            Err(CtxError::DeadlineExceeded)
        );
        // Every send completed, so the producer was never left blocked.
        producer.join().unwrap();
        assert_eq!(handled, 4);
    }

    #[test]
    fn cancellation_is_recorded_but_inputs_still_drain() {
        let ctx = Context::background();
        let (tx, rx) = chan::bounded(0);
        let mut fan = FanIn::new(|_, _: u32| Ok::<(), CtxError>(()));
        fan.add(rx);
        let canceller = ctx.clone();
        let producer = thread::spawn(move || {
            tx.send(1).unwrap();
            canceller.cancel();
            thread::sleep(Duration::from_millis(10));
            tx.send(2).unwrap();
        });
        assert_eq!(fan.run(&ctx), Err(CtxError::Canceled));
        producer.join().unwrap();
    }

    #[test]
    fn nothing_to_do() {
        let fan = FanIn::new(|_, _: ()| Ok::<(), CtxError>(()));
        assert!(fan.is_empty());
        fan.run(&Context::background()).unwrap();
    }
}
