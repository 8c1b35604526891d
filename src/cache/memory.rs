use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;

use super::CacheBackend;

/// Process-local backend. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, u64), Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, namespace: &str, digest: u64, bytes: Vec<u8>) {
        self.entries
            .write()
            .insert((namespace.to_string(), digest), bytes);
    }
}

impl CacheBackend for MemoryCache {
    fn load(&self, namespace: &str, digest: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .get(&(namespace.to_string(), digest))
            .cloned())
    }

    fn store(&self, namespace: &str, digest: u64, bytes: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert((namespace.to_string(), digest), bytes.to_vec());
        Ok(())
    }

    fn clear(&self, namespace: Option<&str>) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        match namespace {
            Some(ns) => entries.retain(|(n, _), _| n != ns),
            None => entries.clear(),
        }
        Ok(before - entries.len())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} entries)", self.len())
    }
}
