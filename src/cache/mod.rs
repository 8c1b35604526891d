//! Persistent incremental cache for merged record streams.
//!
//! An expensive parse+merge is keyed by a cheap [`Fingerprint`] of its inputs.
//! While the fingerprint is unchanged the stored sequence is replayed instead
//! of re-parsing anything.
//!
//! ## Architecture
//!
//! - [`Memo`] wraps a generator with its fingerprint function and a backend
//! - [`CacheBackend`] stores opaque snapshot bytes per (namespace, digest)
//! - [`DiskCache`] keeps one bincode snapshot file per entry
//! - [`MemoryCache`] is process-local, used when the disk is unavailable
//!
//! Caching is an optimisation only. Backend failures are logged and the
//! wrapped generator runs uncached; they never reach the caller.

mod disk;
mod memo;
mod memory;

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::fingerprint::Fingerprint;
use crate::types::Res;

pub use disk::DiskCache;
pub use memo::{Memo, Recorder, Replay};
pub use memory::MemoryCache;

/// Set to anything but empty, `0` or `false` to bypass every cache.
pub const DISABLE_ENV: &str = "HPI_DISABLE_CACHE";

/// Overrides the configured cache directory.
pub const CACHE_DIR_ENV: &str = "HPI_CACHE_DIR";

/// Bumped whenever the snapshot layout changes; older entries become misses.
pub const SNAPSHOT_VERSION: u32 = 1;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Process-wide switch. Disabling takes priority over every [`Memo`].
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether caching is on for this process, considering [`DISABLE_ENV`].
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst) && !env_disables(std::env::var_os(DISABLE_ENV).as_deref())
}

/// Interpret the value of [`DISABLE_ENV`].
pub fn env_disables(value: Option<&OsStr>) -> bool {
    match value {
        None => false,
        Some(v) => {
            let v = v.to_string_lossy();
            let v = v.trim();
            !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
        }
    }
}

/// Byte store underneath the cache. Keys are (namespace, fingerprint digest).
///
/// Entries are written at most once per distinct fingerprint; old entries are
/// never evicted, they just stop being addressed.
pub trait CacheBackend: Send + Sync {
    fn load(&self, namespace: &str, digest: u64) -> Result<Option<Vec<u8>>>;

    fn store(&self, namespace: &str, digest: u64, bytes: &[u8]) -> Result<()>;

    /// Remove every entry of `namespace`, or everything when `None`.
    /// Returns the number of entries removed.
    fn clear(&self, namespace: Option<&str>) -> Result<usize>;

    /// Human readable location, for `hpi cache path`.
    fn describe(&self) -> String;
}

// =============================================================================
// Snapshot encoding
// =============================================================================

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    version: u32,
    namespace: &'a str,
    fingerprint: &'a Fingerprint,
    items: &'a [Res<T>],
}

#[derive(Deserialize)]
struct Snapshot<T> {
    version: u32,
    namespace: String,
    fingerprint: Fingerprint,
    items: Vec<Res<T>>,
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub(crate) fn encode_snapshot<T: Serialize>(
    namespace: &str,
    fingerprint: &Fingerprint,
    items: &[Res<T>],
) -> Result<Vec<u8>> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        namespace,
        fingerprint,
        items,
    };
    bincode::serde::encode_to_vec(&snapshot, bincode_config())
        .context("Failed to encode cache snapshot")
}

/// `Ok(None)` when the bytes are a valid snapshot of something else (older
/// format, other namespace, digest collision). `Err` when they are garbage.
pub(crate) fn decode_snapshot<T: DeserializeOwned>(
    bytes: &[u8],
    namespace: &str,
    fingerprint: &Fingerprint,
) -> Result<Option<Vec<Res<T>>>> {
    let (snapshot, _): (Snapshot<T>, usize) =
        bincode::serde::decode_from_slice(bytes, bincode_config())
            .context("Failed to decode cache snapshot")?;

    if snapshot.version != SNAPSHOT_VERSION
        || snapshot.namespace != namespace
        || snapshot.fingerprint != *fingerprint
    {
        return Ok(None);
    }
    Ok(Some(snapshot.items))
}

// =============================================================================
// Store selection
// =============================================================================

/// Where the disk cache lives: [`CACHE_DIR_ENV`], then `cache.dir` from the
/// config, then the platform cache directory, then the temp directory.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = &config.cache.dir {
        return crate::utils::expand_tilde(&dir.to_string_lossy());
    }
    dirs::cache_dir()
        .map(|d| d.join("hpi"))
        .unwrap_or_else(|| std::env::temp_dir().join("hpi-cache"))
}

/// Open the configured store, falling back to an in-memory one when the
/// directory cannot be created.
pub fn open_store(config: &Config) -> Arc<dyn CacheBackend> {
    if !config.cache.enabled {
        set_enabled(false);
    }
    let dir = cache_dir(config);
    match DiskCache::open(&dir) {
        Ok(disk) => Arc::new(disk),
        Err(e) => {
            tracing::warn!("Failed to open cache at {}: {e:#}", dir.display());
            // No persistence, but still no failure
            Arc::new(MemoryCache::new())
        }
    }
}

#[cfg(test)]
mod tests;
