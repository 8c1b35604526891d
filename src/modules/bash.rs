//! bash history written with `HISTTIMEFORMAT` set, so every command is
//! preceded by a `#<epoch>` line. With `lithist` a command can span several
//! lines; everything up to the next timestamp belongs to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::latin1_lines;
use crate::cache::{CacheBackend, Memo};
use crate::config::HistoryConfig;
use crate::fingerprint::file_fingerprint;
use crate::inputs::{MergeOrder, SourceSet};
use crate::merge::{Records, merge};
use crate::module::{Module, ModuleStats};
use crate::types::{Dated, ParseError, Res, parse_epoch_seconds};

pub const NAME: &str = "bash";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub dt: DateTime<Utc>,
    pub command: String,
}

impl Dated for Entry {
    fn date(&self) -> DateTime<Utc> {
        self.dt
    }
}

fn merge_key(e: &Entry) -> (DateTime<Utc>, String) {
    (e.dt, e.command.clone())
}

/// `#1620931766` style line. Anything else starting with `#` is a comment
/// typed as a command and stays part of the command text.
fn timestamp_line(line: &str) -> Option<DateTime<Utc>> {
    parse_epoch_seconds(line.strip_prefix('#')?)
}

fn finish(dt: DateTime<Utc>, buf: &str) -> Entry {
    Entry {
        dt,
        command: buf.trim_end_matches('\n').to_string(),
    }
}

/// Lazily parse one history file.
pub fn parse_file(path: &Path) -> Records<Entry> {
    let mut lines = match latin1_lines(path) {
        Ok(lines) => lines,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    let path = path.to_path_buf();
    let mut dt: Option<DateTime<Utc>> = None;
    let mut buf = String::new();
    let mut orphan_line: Option<u64> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || -> Option<Res<Entry>> {
        while !done {
            let Some((number, line)) = lines.next() else {
                done = true;
                return dt
                    .take()
                    .filter(|_| !buf.trim().is_empty())
                    .map(|dt| Ok(finish(dt, &buf)));
            };
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    done = true;
                    return Some(Err(e));
                }
            };

            if let Some(new_dt) = timestamp_line(&line) {
                let previous = dt.replace(new_dt);
                let text = std::mem::take(&mut buf);
                match previous {
                    Some(prev) => return Some(Ok(finish(prev, &text))),
                    None if !text.trim().is_empty() => {
                        return Some(Err(ParseError::new(
                            &path,
                            orphan_line,
                            "command text without a preceding timestamp",
                        )));
                    }
                    None => continue,
                }
            }

            if dt.is_none() && orphan_line.is_none() && !line.trim().is_empty() {
                orphan_line = Some(number);
            }
            buf.push_str(&line);
            buf.push('\n');
        }
        None
    }))
}

/// Merge explicitly listed files, uncached, in the order given.
pub fn history_from(paths: &[PathBuf]) -> Records<Entry> {
    Box::new(merge(
        NAME,
        paths.iter().map(|p| parse_file(p)).collect(),
        merge_key,
    ))
}

pub struct Bash {
    config: HistoryConfig,
    memo: Memo<[PathBuf], Entry>,
}

impl Bash {
    pub fn new(config: HistoryConfig, store: Arc<dyn CacheBackend>) -> Self {
        let memo = Memo::new(
            NAME,
            store,
            |paths: &[PathBuf]| file_fingerprint(paths),
            |paths: &[PathBuf]| history_from(paths),
        );
        Self { config, memo }
    }

    /// Every command from every input, deduplicated. Cached as a whole.
    pub fn history(&self) -> Result<Records<Entry>> {
        self.memo.records(&self.inputs()?)
    }
}

impl Module for Bash {
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
