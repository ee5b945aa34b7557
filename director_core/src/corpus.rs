//! Named collections of subjects.

use crate::{
    ctx::{Context, CtxError},
    par,
    subject::{Named, Subject},
};
use rand::{seq::SliceRandom, Rng};
use serde_derive::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorpusError {
    #[error("duplicate corpus entry: '{0}'")]
    Duplicate(String),
    #[error("no corpus entry named '{0}'")]
    Missing(String),
    #[error("corpus too small: want {want} subjects, have {have}")]
    TooSmall { want: usize, have: usize },
    #[error("tried to rename '{from}' to '{to}' while mapping")]
    Renamed { from: String, to: String },
}

/// Map from subject name to subject. Iteration is in name order, which keeps
/// sampling reproducible for a given seed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corpus(BTreeMap<String, Subject>);

impl Corpus {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Corpus of fresh subjects, one per litmus path, named by the caller.
    pub fn from_named<I: IntoIterator<Item = Named>>(named: I) -> Result<Self, CorpusError> {
        let mut c = Corpus::new();
        for n in named {
            c.add(n)?;
        }
        Ok(c)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert `n`, refusing to overwrite an existing entry.
    pub fn add(&mut self, n: Named) -> Result<(), CorpusError> {
        match self.0.entry(n.name) {
            Entry::Occupied(e) => Err(CorpusError::Duplicate(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(n.subject);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Subject> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Subject> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Sorted subject names.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Subject)> {
        self.0.iter()
    }

    /// Owned copies of every entry, in name order.
    pub fn named(&self) -> impl Iterator<Item = Named> + '_ {
        self.0.iter().map(|(n, s)| Named::new(n.clone(), s.clone()))
    }

    /// Visit every entry in name order, stopping at the first error.
    pub fn each<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Named) -> Result<(), E>,
    {
        for n in self.named() {
            f(&n)?;
        }
        Ok(())
    }

    /// Rewrite every entry in place. `f` may change the subject but not its
    /// name.
    pub fn map<E, F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&mut Named) -> Result<(), E>,
        E: From<CorpusError>,
    {
        for (name, subject) in self.0.iter_mut() {
            let mut n = Named::new(name.clone(), std::mem::take(subject));
            let r = f(&mut n);
            *subject = n.subject;
            if n.name != *name {
                return Err(CorpusError::Renamed {
                    from: name.clone(),
                    to: n.name,
                }
                .into());
            }
            r?;
        }
        Ok(())
    }

    /// Run `f` on every entry in parallel, at most `limit` at once (unbounded
    /// if `limit` is 0). The first error cancels the rest.
    pub fn par<E, F>(&self, ctx: &Context, limit: usize, f: F) -> Result<(), E>
    where
        F: Fn(&Context, Named) -> Result<(), E> + Sync,
        E: From<CtxError> + Send + 'static,
    {
        par::group(ctx, limit, |g| {
            for n in self.named() {
                let f = &f;
                if !g.spawn(move |ctx| f(ctx, n)) {
                    break;
                }
            }
        })
    }

    /// Deterministic subset of `want` entries.
    ///
    /// Returns the corpus unchanged if `want` is zero or already matches its
    /// size, and fails if the corpus is smaller than `want`. Otherwise picks
    /// `want` distinct positions from a permutation of the name order and
    /// keeps them in that order.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R, want: usize) -> Result<Self, CorpusError> {
        let have = self.len();
        if want == 0 || want == have {
            return Ok(self);
        }
        if have < want {
            return Err(CorpusError::TooSmall { want, have });
        }
        let mut idx = (0..have).collect::<Vec<_>>();
        idx.shuffle(rng);
        idx.truncate(want);
        idx.sort_unstable();

        let mut chosen = idx.into_iter().peekable();
        let mut out = BTreeMap::new();
        for (i, (name, subject)) in self.0.into_iter().enumerate() {
            if chosen.peek() == Some(&i) {
                chosen.next();
                out.insert(name, subject);
            }
        }
        Ok(Corpus(out))
    }
}

impl IntoIterator for Corpus {
    type Item = (String, Subject);
    type IntoIter = std::collections::btree_map::IntoIter<String, Subject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = (&'a String, &'a Subject);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Subject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Corpus, CorpusError};
    use crate::{
        ctx::{Context, CtxError},
        subject::{Named, Subject},
    };
    use rand::{prelude::SmallRng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn corpus(names: &[&str]) -> Corpus {
        Corpus::from_named(
            names
                .iter()
                .map(|n| Named::new(*n, Subject::new(format!("{}.litmus", n)))),
        )
        .unwrap()
    }

    fn letters() -> Corpus {
        let names = (b'a'..=b'z').map(|c| (c as char).to_string()).collect::<Vec<_>>();
        corpus(&names.iter().map(String::as_str).collect::<Vec<_>>())
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut c = corpus(&["foo", "bar"]);
        let err = c.add(Named::new("foo", Subject::new("other.litmus")));
        assert_eq!(err, Err(CorpusError::Duplicate("foo".to_string())));
        assert_eq!(c.get("foo").unwrap().litmus.to_str(), Some("foo.litmus"));
        assert_eq!(c.names(), vec!["bar", "foo"]);
    }

    #[test]
    fn sample_identity_cases() {
        let mut rng = SmallRng::seed_from_u64(8);
        let c = letters();
        assert_eq!(c.clone().sample(&mut rng, 0).unwrap(), c);
        assert_eq!(c.clone().sample(&mut rng, c.len()).unwrap(), c);
        assert_eq!(
            c.clone().sample(&mut rng, 27),
            Err(CorpusError::TooSmall { want: 27, have: 26 })
        );
    }

    #[test]
    fn sample_subset_keeps_order_and_is_deterministic() {
        let c = letters();
        for seed in 0..16 {
            let a = c
                .clone()
                .sample(&mut SmallRng::seed_from_u64(seed), 10)
                .unwrap();
            let b = c
                .clone()
                .sample(&mut SmallRng::seed_from_u64(seed), 10)
                .unwrap();
            assert_eq!(a, b);
            assert_eq!(a.len(), 10);
            let names = a.names();
            let mut positions = names
                .iter()
                .map(|n| c.names().iter().position(|m| m == n).unwrap())
                .collect::<Vec<_>>();
            let sorted = {
                let mut p = positions.clone();
                p.sort_unstable();
                p
            };
            assert_eq!(positions, sorted);
            positions.dedup();
            assert_eq!(positions.len(), 10);
        }
    }

    #[test]
    fn map_forbids_rename() {
        let mut c = corpus(&["foo"]);
        let r: Result<(), CorpusError> = c.map(|n| {
            n.name = "bar".to_string();
            Ok(())
        });
        assert!(matches!(r, Err(CorpusError::Renamed { .. })));

        let r: Result<(), CorpusError> = c.map(|n| {
            n.subject.threads = 2;
            Ok(())
        });
        r.unwrap();
        assert_eq!(c.get("foo").unwrap().threads, 2);
    }

    #[test]
    fn par_visits_everything() {
        let c = letters();
        let seen = AtomicUsize::new(0);
        let r: Result<(), CtxError> = c.par(&Context::background(), 4, |_, _| {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        r.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 26);
    }

    #[test]
    fn par_first_error_wins() {
        let c = letters();
        let r: Result<(), CtxError> = c.par(&Context::background(), 0, |ctx, n| {
            if n.name == "m" {
                return Err(CtxError::DeadlineExceeded);
            }
            // Everyone else waits to be cancelled by "m".
            ctx.sleep(std::time::Duration::from_secs(30))
        });
        assert_eq!(r, Err(CtxError::DeadlineExceeded));
    }
}
