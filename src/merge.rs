//! Deduplicating merge of overlapping record streams.
//!
//! Sources are concatenated in the order given and the first occurrence of
//! each merge key wins. Callers pick that order deliberately, see
//! [`crate::inputs::MergeOrder`].

use std::collections::HashSet;
use std::hash::Hash;
use std::iter::Flatten;

use crate::types::Res;

/// Streaming "unique everseen" over a record/error stream.
///
/// Only the seen-keys set is held in memory. Errors are passed through as
/// they come and never take part in deduplication.
pub struct UniqueBy<I, K, F> {
    inner: I,
    key: F,
    seen: HashSet<K>,
    dropped: usize,
}

impl<I, T, K, F> Iterator for UniqueBy<I, K, F>
where
    I: Iterator<Item = Res<T>>,
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    type Item = Res<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.inner.next() else {
                if self.dropped > 0 {
                    tracing::debug!(dropped = self.dropped, "duplicates dropped");
                }
                return None;
            };
            match item {
                Ok(record) => {
                    if self.seen.insert((self.key)(&record)) {
                        return Some(Ok(record));
                    }
                    self.dropped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

pub fn unique_by<I, T, K, F>(items: I, key: F) -> UniqueBy<I::IntoIter, K, F>
where
    I: IntoIterator<Item = Res<T>>,
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    UniqueBy {
        inner: items.into_iter(),
        key,
        seen: HashSet::new(),
        dropped: 0,
    }
}

/// Passes a stream through unchanged, warning once it ends if it never
/// produced a single valid record.
///
/// An empty merge is nearly always a glob that matched nothing, but plenty of
/// modules are legitimately empty for some users, so this never fails.
pub struct WarnIfEmpty<I> {
    inner: I,
    label: String,
    records: usize,
    errors: usize,
    finished: bool,
}

impl<I> WarnIfEmpty<I> {
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn errors(&self) -> usize {
        self.errors
    }
}

impl<I, T> Iterator for WarnIfEmpty<I>
where
    I: Iterator<Item = Res<T>>,
{
    type Item = Res<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(record)) => {
                self.records += 1;
                Some(Ok(record))
            }
            Some(Err(e)) => {
                self.errors += 1;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                if self.records == 0 {
                    tracing::warn!(
                        merge = %self.label,
                        errors = self.errors,
                        "merge produced no records, check the configured input paths"
                    );
                }
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            self.inner.size_hint()
        }
    }
}

pub fn warn_if_empty<I, T>(label: impl Into<String>, items: I) -> WarnIfEmpty<I::IntoIter>
where
    I: IntoIterator<Item = Res<T>>,
{
    WarnIfEmpty {
        inner: items.into_iter(),
        label: label.into(),
        records: 0,
        errors: 0,
        finished: false,
    }
}

/// Lazy output of [`merge`].
pub type Merged<S, K, F> = WarnIfEmpty<UniqueBy<Flatten<std::vec::IntoIter<S>>, K, F>>;

/// Merge `sources` into one deduplicated stream.
///
/// `label` names the merge in the empty-result warning.
pub fn merge<S, T, K, F>(label: impl Into<String>, sources: Vec<S>, key: F) -> Merged<S, K, F>
where
    S: Iterator<Item = Res<T>>,
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    warn_if_empty(label, unique_by(sources.into_iter().flatten(), key))
}

/// Boxed record stream, the common currency between parsers, the merger and
/// the cache.
pub type Records<T> = Box<dyn Iterator<Item = Res<T>>>;
