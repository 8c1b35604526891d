//! zsh `EXTENDED_HISTORY` files.
//!
//! Every entry starts with a metadata line `: <epoch>:<duration>;<command>`.
//! Lines that do not look like that continue the previous command (commands
//! entered over several lines). Backups from any number of machines are
//! merged without duplicates; the backups are cached, the live history file
//! is re-read on every call since it changes all the time.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::latin1_lines;
use crate::cache::{CacheBackend, Memo};
use crate::config::HistoryConfig;
use crate::fingerprint::mtime_fingerprint;
use crate::inputs::{MergeOrder, SourceSet};
use crate::merge::{Records, merge};
use crate::module::{Module, ModuleStats};
use crate::types::{Dated, ParseError, Res, parse_epoch_seconds};

pub const NAME: &str = "zsh";

const ORDER: MergeOrder = MergeOrder::OldestFirst;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub dt: DateTime<Utc>,
    /// Seconds the command ran for.
    pub duration: u64,
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

static METADATA_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^: (\d+):(\d+);(.*)$").expect("valid metadata pattern"));

/// Lazily parse one history file.
pub fn parse_file(path: &Path) -> Records<Entry> {
    let lines = match latin1_lines(path) {
        Ok(lines) => lines,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    let path = path.to_path_buf();
    let mut lines = lines;
    let mut current: Option<Entry> = None;
    let mut outbox: VecDeque<Res<Entry>> = VecDeque::new();
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        loop {
            if let Some(item) = outbox.pop_front() {
                return Some(item);
            }
            if done {
                return None;
            }
            let Some((number, line)) = lines.next() else {
                done = true;
                if let Some(last) = current.take() {
                    outbox.push_back(Ok(last));
                }
                continue;
            };
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    outbox.extend(current.take().map(Ok));
                    outbox.push_back(Err(e));
                    continue;
                }
            };

            match METADATA_LINE.captures(&line) {
                Some(caps) => {
                    let dt = parse_epoch_seconds(&caps[1]);
                    let duration = caps[2].parse::<u64>().ok();
                    outbox.extend(current.take().map(Ok));
                    match (dt, duration) {
                        (Some(dt), Some(duration)) => {
                            current = Some(Entry {
                                dt,
                                duration,
                                command: caps[3].to_string(),
                            });
                        }
                        _ => outbox.push_back(Err(ParseError::new(
                            &path,
                            Some(number),
                            "timestamp or duration out of range",
                        ))),
                    }
                }
                None => match current.as_mut() {
                    Some(entry) => {
                        entry.command.push('\n');
                        entry.command.push_str(&line);
                    }
                    None => outbox.push_back(Err(ParseError::new(
                        &path,
                        Some(number),
                        "command text without a preceding metadata line",
                    ))),
                },
            }
        }
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

pub struct Zsh {
    config: HistoryConfig,
    backups: Memo<[PathBuf], Entry>,
}

impl Zsh {
    pub fn new(config: HistoryConfig, store: Arc<dyn CacheBackend>) -> Self {
        let backups = Memo::new(
            NAME,
            store,
            |paths: &[PathBuf]| mtime_fingerprint(paths),
            |paths: &[PathBuf]| history_from(paths),
        );
        Self { config, backups }
    }

    pub fn sources(&self) -> Result<SourceSet> {
        SourceSet::resolve(&self.config.export_path, self.config.live_file.as_deref())
    }

    /// Every command from the backups and the live file, deduplicated.
    pub fn history(&self) -> Result<Records<Entry>> {
        let sources = self.sources()?;
        let backups = self.backups.records(&sources.backups)?;
        Ok(match &sources.live {
            // Skip the extra merge when there is nothing to merge in
            None => backups,
            Some(live) => Box::new(merge(NAME, vec![backups, parse_file(live)], merge_key)),
        })
    }
}

impl Module for Zsh {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Result<Vec<PathBuf>> {
        Ok(self.sources()?.ordered(ORDER))
    }

    fn stats(&self) -> Result<ModuleStats> {
        Ok(ModuleStats::from_records(NAME, self.history()?))
    }

    fn is_available(&self) -> bool {
        !self.config.export_path.is_empty() || self.config.live_file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::types::ok_records;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn pairs(entries: impl IntoIterator<Item = Entry>) -> Vec<(i64, String)> {
        entries
            .into_iter()
            .map(|e| (e.dt.timestamp(), e.command))
            .collect()
    }

    #[test]
    fn parses_single_and_multi_line_commands() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "h",
            ": 1598471925:470;python3\n: 1598471930:0;for f in *; do\n  echo $f\ndone\n: 1598471940:2;ls\n",
        );

        let entries: Vec<_> = ok_records(parse_file(&path)).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            Entry {
                dt: at(1598471925),
                duration: 470,
                command: "python3".into()
            }
        );
        assert_eq!(entries[1].command, "for f in *; do\n  echo $f\ndone");
        assert_eq!(entries[2].command, "ls");
    }

    #[test]
    fn leading_text_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "h", "garbage\n: 100:0;ls\n");

        let items: Vec<_> = parse_file(&path).collect();
        assert_eq!(items.len(), 2);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.line, Some(1));
        assert_eq!(items[1].as_ref().unwrap().command, "ls");
    }

    #[test]
    fn metadata_line_shape() {
        let caps = METADATA_LINE.captures(": 1598471925:470;git commit -m 'a;b'").unwrap();
        assert_eq!(&caps[1], "1598471925");
        assert_eq!(&caps[2], "470");
        assert_eq!(&caps[3], "git commit -m 'a;b'");
        assert!(METADATA_LINE.is_match(": 1:0;"));
        assert!(!METADATA_LINE.is_match("  : 1:0;ls"));
        assert!(!METADATA_LINE.is_match(": 1;ls"));
    }

    #[test]
    fn files_parsed_one_after_another_share_the_pattern() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a", ": 100:0;ls\n");
        let b = write(&dir, "b", "stray\n: 200:0;pwd\n");
        assert_eq!(ok_records(parse_file(&a)).count(), 1);
        let items: Vec<_> = parse_file(&b).collect();
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().command, "pwd");
    }

    #[test]
    fn empty_command_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "h", ": 100:0;\n");
        let entries: Vec<_> = ok_records(parse_file(&path)).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command, "");
    }

    #[test]
    fn unreadable_file_yields_one_error() {
        let items: Vec<_> = parse_file(Path::new("/nonexistent/zsh_history")).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn overlapping_backups_merge_to_unique_commands() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a", ": 100:0;ls\n: 200:0;cd /tmp\n: 300:0;ls\n");
        let b = write(&dir, "b", ": 200:0;cd /tmp\n: 300:0;ls\n: 400:0;pwd\n");

        let merged = pairs(ok_records(history_from(&[a, b])));
        assert_eq!(
            merged,
            vec![
                (100, "ls".to_string()),
                (200, "cd /tmp".to_string()),
                (300, "ls".to_string()),
                (400, "pwd".to_string()),
            ]
        );
    }

    #[test]
    fn live_file_is_merged_after_cached_backups() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("backups")).unwrap();
        write(&dir, "backups/2024-01.zsh", ": 100:0;ls\n: 200:0;make\n");
        write(&dir, "backups/2024-02.zsh", ": 200:0;make\n: 300:0;git status\n");
        let live = write(&dir, "live", ": 300:0;git status\n: 400:5;cargo doc\n");

        let config = HistoryConfig {
            export_path: vec![format!("{}/backups/*.zsh", dir.path().display())],
            live_file: Some(live.to_string_lossy().into_owned()),
        };
        let store = Arc::new(MemoryCache::new());
        let zsh = Zsh::new(config, store.clone());

        let first = pairs(ok_records(zsh.history().unwrap()));
        assert_eq!(
            first.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec![100, 200, 300, 400]
        );
        assert_eq!(store.len(), 1);

        // Live file changes never touch the cached backups
        fs::write(&live, ": 300:0;git status\n: 400:5;cargo doc\n: 500:0;exit\n").unwrap();
        let second = pairs(ok_records(zsh.history().unwrap()));
        assert_eq!(second.len(), 5);
        assert_eq!(store.len(), 1);

        assert_eq!(zsh.inputs().unwrap().last(), Some(&live));
        let stats = zsh.stats().unwrap();
        assert_eq!(stats.records, 5);
        assert_eq!(stats.first, Some(at(100)));
    }
}
