//! Outcome of compiling and running one subject on one compiler.

use serde_derive::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown status: '{0}'")]
pub struct StatusError(pub String);

/// Declaration order is severity order: later variants are worse, so the
/// worst status of a set is its maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    #[default]
    Unknown,
    Ok,
    Flagged,
    CompileFail,
    CompileTimeout,
    RunFail,
    RunTimeout,
}

const NAMES: [(Status, &str); 7] = [
    (Status::Unknown, "unknown"),
    (Status::Ok, "ok"),
    (Status::Flagged, "flagged"),
    (Status::CompileFail, "compile/fail"),
    (Status::CompileTimeout, "compile/timeout"),
    (Status::RunFail, "run/fail"),
    (Status::RunTimeout, "run/timeout"),
];

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Unknown,
        Status::Ok,
        Status::Flagged,
        Status::CompileFail,
        Status::CompileTimeout,
        Status::RunFail,
        Status::RunTimeout,
    ];

    pub fn name(self) -> &'static str {
        NAMES[self as usize].1
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Whether this status indicates a problem with the compiler under test
    /// rather than a passing result.
    #[inline]
    pub fn is_bad(self) -> bool {
        self > Status::Ok
    }

    /// The worst of `statuses`, or `Unknown` if there are none.
    pub fn worst<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses.into_iter().max().unwrap_or_default()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAMES
            .iter()
            .find(|(_, n)| *n == s)
            .map(|(st, _)| *st)
            .ok_or_else(|| StatusError(s.to_string()))
    }
}

impl TryFrom<String> for Status {
    type Error = StatusError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Status> for String {
    fn from(s: Status) -> String {
        s.name().to_string()
    }
}
