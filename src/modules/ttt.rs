//! History from `ttt`, a shell history logger writing
//! `epoch,directory,command` rows. A directory of `-` means it was unknown.
//!
//! Not cached: the files are small and parsing is a single pass.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::csv_rows::CsvRows;
use super::read_bytes;
use crate::config::HistoryConfig;
use crate::inputs::{MergeOrder, SourceSet};
use crate::merge::{Records, merge};
use crate::module::{Module, ModuleStats};
use crate::types::{Dated, ParseError, parse_epoch_seconds};

pub const NAME: &str = "ttt";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub dt: DateTime<Utc>,
    pub command: String,
    pub directory: Option<String>,
}

impl Dated for Entry {
    fn date(&self) -> DateTime<Utc> {
        self.dt
    }
}

fn merge_key(e: &Entry) -> (DateTime<Utc>, String) {
    (e.dt, e.command.clone())
}

pub fn parse_file(path: &Path) -> Records<Entry> {
    let bytes = match read_bytes(path) {
        Ok(bytes) => bytes,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    let path = path.to_path_buf();
    Box::new(CsvRows::new(bytes).map(move |row| {
        let row = row.map_err(|e| ParseError::new(&path, Some(e.line), e.reason))?;
        let [epoch, directory, command] = row.fields.as_slice() else {
            return Err(ParseError::new(
                &path,
                Some(row.line),
                format!("expected 3 fields, found {}", row.fields.len()),
            ));
        };
        let dt = parse_epoch_seconds(epoch).ok_or_else(|| {
            ParseError::new(&path, Some(row.line), format!("invalid timestamp {epoch:?}"))
        })?;
        Ok(Entry {
            dt,
            command: command.clone(),
            directory: (directory != "-").then(|| directory.clone()),
        })
    }))
}

pub struct Ttt {
    config: HistoryConfig,
}

impl Ttt {
    pub fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Backups then the live file, deduplicated.
    pub fn history(&self) -> Result<Records<Entry>> {
        let paths = self.inputs()?;
        Ok(Box::new(merge(
            NAME,
            paths.iter().map(|p| parse_file(p)).collect(),
            merge_key,
        )))
    }
}

impl Module for Ttt {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Result<Vec<PathBuf>> {
        let sources =
            SourceSet::resolve(&self.config.export_path, self.config.live_file.as_deref())?;
        Ok(sources.ordered(MergeOrder::OldestFirst))
    }

    fn stats(&self) -> Result<ModuleStats> {
        Ok(ModuleStats::from_records(NAME, self.history()?))
    }

    fn is_available(&self) -> bool {
        !self.config.export_path.is_empty() || self.config.live_file.is_some()
    }
}
