//! Parsing the observations printed by Herd- and Litmus-style test binaries.
//!
//! Both print the set of final states, a verdict on the test's condition and
//! witness counts:
//!
//! ```text
//! States 2                        Histogram (2 states)
//! 0:r0=0; 1:r0=1;                 5000  *>0:r0=0; 1:r0=1;
//! 0:r0=1; 1:r0=1;                 5000  :>0:r0=1; 1:r0=1;
//! Ok                              Ok
//! Witnesses                       Witnesses
//! Positive: 1 Negative: 1         Positive: 5000, Negative: 5000
//! ```

use crate::services::ObsParser;
use director_core::{ctx::Context, plan::Backend, subject::Observation};
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObsError {
    #[error("failed to read observation: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad state count in '{0}'")]
    BadCount(String),
    #[error("expected {want} states, got {got}")]
    Truncated { want: usize, got: usize },
    #[error("bad witness line '{0}'")]
    BadWitnesses(String),
    #[error("no state block in observation")]
    NoStates,
    #[error("no verdict in observation")]
    NoVerdict,
}

/// Parses observations regardless of backend.
#[derive(Debug, Default)]
pub struct HerdParser;

impl ObsParser for HerdParser {
    fn parse_obs(&self, _ctx: &Context, _backend: &Backend, r: &mut dyn Read) -> anyhow::Result<Observation> {
        Ok(parse(r)?)
    }
}

#[derive(Clone, Copy)]
enum Block {
    Outside,
    States { want: usize },
    Witnesses,
}

pub fn parse<R: Read + ?Sized>(r: &mut R) -> Result<Observation, ObsError> {
    let mut obs = Observation::default();
    let mut block = Block::Outside;
    let mut seen_states = false;
    let mut seen_verdict = false;

    for line in BufReader::new(r).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match block {
            Block::States { want } => {
                obs.states.push(strip_histogram(line).to_string());
                if obs.states.len() == want {
                    block = Block::Outside;
                }
                continue;
            }
            Block::Witnesses => {
                let (pos, neg) = parse_witnesses(line)?;
                obs.witnesses = pos;
                obs.counter_examples = neg;
                block = Block::Outside;
                continue;
            }
            Block::Outside => {}
        }

        if let Some(n) = state_count(line)? {
            seen_states = true;
            if n > 0 {
                block = Block::States { want: n };
            }
            continue;
        }
        match line {
            "Ok" => obs.flags.sat = true,
            "No" => obs.flags.unsat = true,
            "Undef" => obs.flags.undef = true,
            "Witnesses" => {
                block = Block::Witnesses;
                continue;
            }
            _ => continue,
        }
        seen_verdict = true;
    }

    if let Block::States { want } = block {
        return Err(ObsError::Truncated {
            want,
            got: obs.states.len(),
        });
    }
    if !seen_states {
        return Err(ObsError::NoStates);
    }
    if !seen_verdict {
        return Err(ObsError::NoVerdict);
    }
    Ok(obs)
}

/// `States n` or `Histogram (n states)`.
fn state_count(line: &str) -> Result<Option<usize>, ObsError> {
    let n = if let Some(rest) = line.strip_prefix("States ") {
        rest
    } else if let Some(rest) = line.strip_prefix("Histogram (") {
        rest.trim_end_matches(')').trim_end_matches("states").trim()
    } else {
        return Ok(None);
    };
    n.trim()
        .parse()
        .map(Some)
        .map_err(|_| ObsError::BadCount(line.to_string()))
}

/// Drop the leading count and witness marker of a histogram line.
fn strip_histogram(line: &str) -> &str {
    let first = line.split_whitespace().next().unwrap_or_default();
    if !first.is_empty() && first.bytes().all(|b| b.is_ascii_digit()) {
        let rest = line[first.len()..].trim_start();
        rest.strip_prefix("*>")
            .or_else(|| rest.strip_prefix(":>"))
            .unwrap_or(rest)
            .trim()
    } else {
        line
    }
}

fn parse_witnesses(line: &str) -> Result<(u64, u64), ObsError> {
    let bad = || ObsError::BadWitnesses(line.to_string());
    let mut pos = None;
    let mut neg = None;
    let mut words = line.split(|c: char| c.is_whitespace() || c == ',').filter(|w| !w.is_empty());
    while let Some(w) = words.next() {
        let slot = match w {
            "Positive:" => &mut pos,
            "Negative:" => &mut neg,
            _ => continue,
        };
        *slot = Some(words.next().and_then(|n| n.parse().ok()).ok_or_else(bad)?);
    }
    match (pos, neg) {
        (Some(p), Some(n)) => Ok((p, n)),
        _ => Err(bad()),
    }
}
