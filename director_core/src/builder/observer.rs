//! Progress reporting out of a [`Builder`](super::Builder).

use super::request::Request;
use crossbeam_channel::Sender;
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;

/// Describes one batch of builder work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Name of the task, usually the stage.
    pub name: String,
    /// Number of requests the builder will consume.
    pub n_reqs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Start(Manifest),
    Step { index: usize, request: Request },
    End,
}

pub trait Observer: Send + Sync {
    fn on_build(&self, m: &Message);
}

pub type ObserverRef = Arc<dyn Observer>;

pub fn notify(observers: &[ObserverRef], m: &Message) {
    for o in observers {
        o.on_build(m);
    }
}

/// Forwards every message into a channel, e.g. for a [`FanIn`](crate::fanin::FanIn)
/// collector. Messages are dropped once the receiving side is gone.
pub struct ChannelObserver {
    tx: Sender<Message>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<Message>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn on_build(&self, m: &Message) {
        let _ = self.tx.send(m.clone());
    }
}
