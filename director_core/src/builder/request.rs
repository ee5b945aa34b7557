//! Requests that producers send to a [`Builder`](super::Builder).

use crate::{
    id::Id,
    subject::{CompileResult, Harness, Named, RunResult, Subject},
};
use serde_derive::{Deserialize, Serialize};

/// A change to the subject called `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    /// Insert a whole new subject.
    Add(Subject),
    /// Record a compile result against an existing subject.
    Compile {
        compiler: Id,
        result: CompileResult,
    },
    /// Record a lifted harness against an existing subject.
    Harness { arch: Id, harness: Harness },
    /// Record a run result against an existing subject.
    Run { compiler: Id, result: RunResult },
}

impl Request {
    pub fn add(named: Named) -> Self {
        Self {
            name: named.name,
            body: RequestBody::Add(named.subject),
        }
    }

    pub fn compile(name: &str, compiler: Id, result: CompileResult) -> Self {
        Self {
            name: name.to_string(),
            body: RequestBody::Compile { compiler, result },
        }
    }

    pub fn harness(name: &str, arch: Id, harness: Harness) -> Self {
        Self {
            name: name.to_string(),
            body: RequestBody::Harness { arch, harness },
        }
    }

    pub fn run(name: &str, compiler: Id, result: RunResult) -> Self {
        Self {
            name: name.to_string(),
            body: RequestBody::Run { compiler, result },
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self.body {
            RequestBody::Add(_) => RequestKind::Add,
            RequestBody::Compile { .. } => RequestKind::Compile,
            RequestBody::Harness { .. } => RequestKind::Harness,
            RequestBody::Run { .. } => RequestKind::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Add,
    Compile,
    Harness,
    Run,
}
