use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::types::{Dated, Res};

/// Main trait that every data module implements
pub trait Module: Send + Sync {
    /// Name used on the command line and in cache namespaces
    fn name(&self) -> &'static str;

    /// Resolve the module's configured inputs to the files (or repositories)
    /// it would read right now
    fn inputs(&self) -> Result<Vec<PathBuf>>;

    /// Run the module's full pipeline and summarise it
    fn stats(&self) -> Result<ModuleStats>;

    /// Whether the module has anything configured to read
    fn is_available(&self) -> bool;
}

/// Summary of one module's output, printed by `hpi stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleStats {
    pub name: String,
    pub records: usize,
    pub errors: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl ModuleStats {
    /// Consume a record stream, counting records and errors and tracking the
    /// date range of the records.
    pub fn from_records<T, I>(name: &str, items: I) -> Self
    where
        T: Dated,
        I: IntoIterator<Item = Res<T>>,
    {
        let mut stats = Self {
            name: name.to_string(),
            records: 0,
            errors: 0,
            first: None,
            last: None,
        };
        for item in items {
            match item {
                Ok(record) => {
                    let date = record.date();
                    stats.records += 1;
                    stats.first = Some(stats.first.map_or(date, |d| d.min(date)));
                    stats.last = Some(stats.last.map_or(date, |d| d.max(date)));
                }
                Err(e) => {
                    tracing::debug!(module = name, "{e}");
                    stats.errors += 1;
                }
            }
        }
        stats
    }
}

/// Registry for managing the configured modules
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register<M: Module + 'static>(&mut self, module: M) {
        self.modules.push(Box::new(module));
    }

    /// Modules with something configured
    pub fn available_modules(&self) -> Vec<&dyn Module> {
        self.modules
            .iter()
            .filter(|m| m.is_available())
            .map(|m| m.as_ref())
            .collect()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&dyn Module> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Stats of every available module. A module that fails is logged and
    /// left out; the others still report.
    pub fn all_stats(&self) -> Vec<ModuleStats> {
        let mut all = Vec::new();
        for module in self.available_modules() {
            match module.stats() {
                Ok(stats) => all.push(stats),
                Err(e) => tracing::error!(module = module.name(), "Failed to load: {e:#}"),
            }
        }
        all
    }
}
