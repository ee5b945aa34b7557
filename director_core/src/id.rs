//! Dotted, hierarchical identifiers such as `x86.64` or `gcc.O3`.

use serde_derive::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};
use thiserror::Error;

/// Separator between tags in the string form of an [`Id`].
pub const SEP: char = '.';
/// Wildcard tag accepted by [`Id::matches_glob`].
pub const WILDCARD: &str = "*";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty tag in id '{0}'")]
    EmptyTag(String),
    #[error("tag '{0}' contains separator '.'")]
    TagContainsSep(String),
    #[error("glob '{0}' has more than one wildcard")]
    MultipleWildcards(String),
    #[error("glob '{0}' uses '*' inside a tag")]
    PartialWildcard(String),
}

/// Immutable list of tags. The empty id has no tags.
///
/// Ordering is lexicographic by tag, not by string form, so `a.b` sorts
/// before `a-b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id {
    tags: Vec<String>,
}

impl Id {
    pub fn new<I, S>(tags: I) -> Result<Self, IdError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect::<Vec<String>>();
        for t in &tags {
            if t.is_empty() {
                return Err(IdError::EmptyTag(tags.join(".")));
            }
            if t.contains(SEP) {
                return Err(IdError::TagContainsSep(t.clone()));
            }
        }
        Ok(Self { tags })
    }

    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// New id with the tags of `other` appended.
    pub fn join(&self, other: &Id) -> Id {
        let mut tags = self.tags.clone();
        tags.extend(other.tags.iter().cloned());
        Id { tags }
    }

    /// First tag and the rest.
    pub fn uncons(&self) -> Option<(&str, Id)> {
        let (first, rest) = self.tags.split_first()?;
        Some((first.as_str(), Id { tags: rest.to_vec() }))
    }

    /// Everything but the last tag, and the last tag.
    pub fn unsnoc(&self) -> Option<(Id, &str)> {
        let (last, init) = self.tags.split_last()?;
        Some((Id { tags: init.to_vec() }, last.as_str()))
    }

    pub fn has_prefix(&self, prefix: &Id) -> bool {
        self.tags.starts_with(&prefix.tags)
    }

    pub fn has_suffix(&self, suffix: &Id) -> bool {
        self.tags.ends_with(&suffix.tags)
    }

    /// Whether `self` matches `glob`, an id in which at most one tag is `*`.
    /// The wildcard stands for zero or more whole tags.
    pub fn matches_glob(&self, glob: &Id) -> Result<bool, IdError> {
        let mut wild = None;
        for (i, t) in glob.tags.iter().enumerate() {
            if t == WILDCARD {
                if wild.is_some() {
                    return Err(IdError::MultipleWildcards(glob.to_string()));
                }
                wild = Some(i);
            } else if t.contains(WILDCARD) {
                return Err(IdError::PartialWildcard(glob.to_string()));
            }
        }
        let i = match wild {
            Some(i) => i,
            None => return Ok(self == glob),
        };
        let (pre, post) = (&glob.tags[..i], &glob.tags[i + 1..]);
        Ok(self.tags.len() >= pre.len() + post.len()
            && self.tags.starts_with(pre)
            && self.tags.ends_with(post))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tags.join("."))
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Id::empty());
        }
        let tags = s.split(SEP).collect::<Vec<_>>();
        if tags.iter().any(|t| t.is_empty()) {
            return Err(IdError::EmptyTag(s.to_string()));
        }
        Ok(Id {
            tags: tags.into_iter().map(String::from).collect(),
        })
    }
}

impl TryFrom<String> for Id {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Id> for String {
    fn from(id: Id) -> String {
        id.to_string()
    }
}
