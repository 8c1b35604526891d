//! Cheap signatures of input state, used as cache-invalidation keys.
//!
//! A fingerprint only stats files; it never reads content. Two calls against
//! an unchanged set of files return equal values, and touching, adding or
//! removing a file changes the value. A file whose content changes while its
//! mtime stays put is NOT detected: the cache will serve stale data for it.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Signature of "the state of all inputs right now".
///
/// Every variant is stored sorted, so the order in which the inputs were
/// listed does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fingerprint {
    /// Modification times in nanoseconds since the epoch.
    Mtimes(Vec<i128>),
    /// Path strings.
    Paths(Vec<String>),
    /// (path, mtime in nanoseconds, size in bytes) per file.
    Files(Vec<(String, i128, u64)>),
}

impl Fingerprint {
    /// Stable 64-bit digest, used to address cache entries on disk.
    ///
    /// Unlike `DefaultHasher` this does not change between Rust releases, so
    /// entries written by one build are found by the next.
    pub fn digest(&self) -> u64 {
        let mut bytes = Vec::new();
        match self {
            Fingerprint::Mtimes(mtimes) => {
                bytes.push(0u8);
                for m in mtimes {
                    bytes.extend_from_slice(&m.to_le_bytes());
                }
            }
            Fingerprint::Paths(paths) => {
                bytes.push(1u8);
                for p in paths {
                    bytes.extend_from_slice(p.as_bytes());
                    bytes.push(0);
                }
            }
            Fingerprint::Files(files) => {
                bytes.push(2u8);
                for (p, mtime, size) in files {
                    bytes.extend_from_slice(p.as_bytes());
                    bytes.push(0);
                    bytes.extend_from_slice(&mtime.to_le_bytes());
                    bytes.extend_from_slice(&size.to_le_bytes());
                }
            }
        }
        xxh3_64(&bytes)
    }

    /// Number of inputs this fingerprint covers.
    pub fn len(&self) -> usize {
        match self {
            Fingerprint::Mtimes(v) => v.len(),
            Fingerprint::Paths(v) => v.len(),
            Fingerprint::Files(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn nanos_since_epoch(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

/// Modification time of a single path. Fails if the path vanished.
pub fn mtime(path: &Path) -> Result<i128> {
    let meta = fs::metadata(path)
        .with_context(|| format!("Failed to stat input {}", path.display()))?;
    let modified = meta
        .modified()
        .with_context(|| format!("No modification time for {}", path.display()))?;
    Ok(nanos_since_epoch(modified))
}

/// Sorted modification times of every path.
pub fn mtime_fingerprint<P: AsRef<Path>>(paths: &[P]) -> Result<Fingerprint> {
    let mut mtimes = paths
        .iter()
        .map(|p| mtime(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    mtimes.sort_unstable();
    Ok(Fingerprint::Mtimes(mtimes))
}

/// Sorted path strings. Never touches the filesystem.
///
/// Suited to inputs that are immutable once written (dated backups), where
/// a new file name is the only change that can happen.
pub fn path_fingerprint<P: AsRef<Path>>(paths: &[P]) -> Fingerprint {
    let mut names: Vec<String> = paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect();
    names.sort_unstable();
    Fingerprint::Paths(names)
}

/// Sorted (path, mtime, size) triples.
pub fn file_fingerprint<P: AsRef<Path>>(paths: &[P]) -> Result<Fingerprint> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let meta = fs::metadata(path)
            .with_context(|| format!("Failed to stat input {}", path.display()))?;
        let modified = meta
            .modified()
            .with_context(|| format!("No modification time for {}", path.display()))?;
        files.push((
            path.to_string_lossy().into_owned(),
            nanos_since_epoch(modified),
            meta.len(),
        ));
    }
    files.sort_unstable();
    Ok(Fingerprint::Files(files))
}

/// Fingerprint of a repository-like directory: (path, mtime, size) of every
/// marker below `dir` that exists. A marker naming a directory contributes
/// every file beneath it. Fails when none of the markers exist.
pub fn marker_fingerprint(dir: &Path, markers: &[&str]) -> Result<Fingerprint> {
    let mut files = Vec::new();
    for marker in markers {
        let candidate = dir.join(marker);
        if candidate.is_dir() {
            for entry in walkdir::WalkDir::new(&candidate) {
                let entry = entry
                    .with_context(|| format!("Failed to read directory {}", candidate.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else if candidate.exists() {
            files.push(candidate);
        }
    }
    anyhow::ensure!(
        !files.is_empty(),
        "None of {markers:?} found in {}, cannot fingerprint",
        dir.display()
    );
    file_fingerprint(&files)
}
