//! On-disk cache backend.
//!
//! Layout: `<root>/<namespace>-<tag>/<digest as 16 hex digits>.bin`, one
//! bincode snapshot per file. The tag is a short hash of the raw namespace:
//! making a namespace filesystem safe can map two of them to one name.
//!
//! Writes go to a temporary sibling and are renamed into place so a crashed
//! write never leaves a truncated entry behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use xxhash_rust::xxh3::xxh3_64;

use super::CacheBackend;
use crate::utils::{dir_size, format_bytes, safe_file_name};

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        let tag = xxh3_64(namespace.as_bytes()) as u32;
        self.root
            .join(format!("{}-{tag:08x}", safe_file_name(namespace)))
    }

    pub fn entry_path(&self, namespace: &str, digest: u64) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{digest:016x}.bin"))
    }

    pub fn size_on_disk(&self) -> u64 {
        dir_size(&self.root)
    }
}

fn count_entries(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

impl CacheBackend for DiskCache {
    fn load(&self, namespace: &str, digest: u64) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(namespace, digest);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn store(&self, namespace: &str, digest: u64, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(namespace, digest);
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move cache entry into {}", path.display()))?;
        Ok(())
    }

    fn clear(&self, namespace: Option<&str>) -> Result<usize> {
        let targets: Vec<PathBuf> = match namespace {
            Some(ns) => vec![self.namespace_dir(ns)],
            None => fs::read_dir(&self.root)
                .with_context(|| format!("Failed to list {}", self.root.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
        };

        let mut removed = 0;
        for dir in targets {
            if !dir.exists() {
                continue;
            }
            removed += count_entries(&dir);
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        Ok(removed)
    }

    fn describe(&self) -> String {
        format!(
            "{} ({})",
            self.root.display(),
            format_bytes(self.size_on_disk())
        )
    }
}
