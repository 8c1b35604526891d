use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{CacheBackend, decode_snapshot, encode_snapshot, is_enabled};
use crate::fingerprint::Fingerprint;
use crate::merge::Records;
use crate::types::Res;

/// A record generator memoized on a fingerprint of its inputs.
///
/// `call` fingerprints the argument every time. On a hit the stored sequence
/// is replayed and the generator is not run. On a miss the generator's output
/// is streamed to the caller and persisted once it has been fully consumed.
///
/// Fingerprint errors propagate: they mean the inputs vanished underneath us.
/// Storage errors never do.
pub struct Memo<A: ?Sized, T> {
    namespace: String,
    store: Arc<dyn CacheBackend>,
    depends_on: Box<dyn Fn(&A) -> Result<Fingerprint> + Send + Sync>,
    compute: Box<dyn Fn(&A) -> Records<T> + Send + Sync>,
}

impl<A, T> Memo<A, T>
where
    A: ?Sized,
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    pub fn new<D, C, I>(
        namespace: impl Into<String>,
        store: Arc<dyn CacheBackend>,
        depends_on: D,
        compute: C,
    ) -> Self
    where
        D: Fn(&A) -> Result<Fingerprint> + Send + Sync + 'static,
        C: Fn(&A) -> I + Send + Sync + 'static,
        I: Iterator<Item = Res<T>> + 'static,
    {
        Self {
            namespace: namespace.into(),
            store,
            depends_on: Box::new(depends_on),
            compute: Box::new(move |arg: &A| -> Records<T> { Box::new(compute(arg)) }),
        }
    }

    pub fn call(&self, arg: &A) -> Result<Replay<T>> {
        if !is_enabled() {
            tracing::debug!(namespace = %self.namespace, "cache disabled, computing directly");
            return Ok(Replay::Uncached((self.compute)(arg)));
        }

        let fingerprint = (self.depends_on)(arg)?;
        let digest = fingerprint.digest();
        if fingerprint.is_empty() {
            tracing::debug!(namespace = %self.namespace, "no inputs, caching an empty run");
        }

        match self.store.load(&self.namespace, digest) {
            Ok(Some(bytes)) => {
                match decode_snapshot::<T>(&bytes, &self.namespace, &fingerprint) {
                    Ok(Some(items)) => {
                        tracing::debug!(
                            namespace = %self.namespace,
                            digest = %format!("{digest:016x}"),
                            items = items.len(),
                            "cache hit"
                        );
                        return Ok(Replay::Hit(items.into_iter()));
                    }
                    Ok(None) => {
                        tracing::debug!(
                            namespace = %self.namespace,
                            "stale cache entry, recomputing"
                        );
                    }
                    // Recording below overwrites the broken entry
                    Err(e) => {
                        tracing::warn!(
                            namespace = %self.namespace,
                            "corrupted cache entry, recomputing: {e:#}"
                        );
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(
                    namespace = %self.namespace,
                    inputs = fingerprint.len(),
                    "cache miss"
                );
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    "cache unavailable, computing uncached: {e:#}"
                );
                return Ok(Replay::Uncached((self.compute)(arg)));
            }
        }

        Ok(Replay::Miss(Recorder {
            inner: (self.compute)(arg),
            buffer: Vec::new(),
            pending: Some(PendingWrite {
                store: Arc::clone(&self.store),
                namespace: self.namespace.clone(),
                fingerprint,
                digest,
            }),
        }))
    }

    /// Same as [`Memo::call`], boxed.
    pub fn records(&self, arg: &A) -> Result<Records<T>> {
        Ok(Box::new(self.call(arg)?))
    }

    /// Drop every stored entry of this namespace.
    pub fn clear(&self) -> Result<usize> {
        self.store.clear(Some(&self.namespace))
    }
}

/// Output of one [`Memo::call`].
pub enum Replay<T> {
    /// Replayed from storage.
    Hit(std::vec::IntoIter<Res<T>>),
    /// Freshly computed and being recorded.
    Miss(Recorder<T>),
    /// Freshly computed, nothing will be stored.
    Uncached(Records<T>),
}

impl<T> Replay<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Replay::Hit(_))
    }
}

impl<T: Serialize + Clone> Iterator for Replay<T> {
    type Item = Res<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Replay::Hit(items) => items.next(),
            Replay::Miss(recorder) => recorder.next(),
            Replay::Uncached(inner) => inner.next(),
        }
    }
}

struct PendingWrite {
    store: Arc<dyn CacheBackend>,
    namespace: String,
    fingerprint: Fingerprint,
    digest: u64,
}

impl PendingWrite {
    fn commit<T: Serialize>(self, items: &[Res<T>]) {
        let written = encode_snapshot(&self.namespace, &self.fingerprint, items)
            .and_then(|bytes| self.store.store(&self.namespace, self.digest, &bytes));
        match written {
            Ok(()) => tracing::debug!(
                namespace = %self.namespace,
                items = items.len(),
                "cache entry written"
            ),
            Err(e) => tracing::warn!(
                namespace = %self.namespace,
                "failed to write cache entry: {e:#}"
            ),
        }
    }
}

/// Streams a freshly computed sequence while keeping a copy of every item.
///
/// The copy is persisted when the inner sequence is exhausted. A caller that
/// stops early leaves nothing behind, so a partial sequence is never replayed.
pub struct Recorder<T> {
    inner: Records<T>,
    buffer: Vec<Res<T>>,
    pending: Option<PendingWrite>,
}

impl<T: Serialize + Clone> Iterator for Recorder<T> {
    type Item = Res<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                if self.pending.is_some() {
                    self.buffer.push(item.clone());
                }
                Some(item)
            }
            None => {
                if let Some(pending) = self.pending.take() {
                    pending.commit(&self.buffer);
                    self.buffer = Vec::new();
                }
                None
            }
        }
    }
}
