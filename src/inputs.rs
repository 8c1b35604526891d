//! Resolving a module's configured inputs into an ordered set of files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::utils::{expand_tilde, warn_once};

/// Which end of the source set is treated as most authoritative.
///
/// The merger keeps the first occurrence of each key, so whatever comes first
/// wins ties. Records that are identical under the key in every copy make the
/// choice irrelevant; records that can differ (a window duration still being
/// written, say) need the newest copy first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    /// Backups oldest to newest, live file last. Earlier copies win.
    OldestFirst,
    /// Live file first, then backups newest to oldest. The live copy wins.
    NewestFirst,
}

/// Backups plus an optional live file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    /// Backup files, sorted by path (dated file names sort oldest first).
    pub backups: Vec<PathBuf>,
    pub live: Option<PathBuf>,
}

impl SourceSet {
    pub fn new(backups: Vec<PathBuf>, live: Option<PathBuf>) -> Self {
        Self { backups, live }
    }

    /// Resolve glob patterns and an optional live file path.
    pub fn resolve(patterns: &[String], live: Option<&str>) -> Result<Self> {
        Ok(Self {
            backups: expand_globs(patterns)?,
            live: live.and_then(live_file),
        })
    }

    /// Every input in merge order.
    pub fn ordered(&self, order: MergeOrder) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.backups.len() + 1);
        match order {
            MergeOrder::OldestFirst => {
                paths.extend(self.backups.iter().cloned());
                paths.extend(self.live.iter().cloned());
            }
            MergeOrder::NewestFirst => {
                paths.extend(self.live.iter().cloned());
                paths.extend(self.backups.iter().rev().cloned());
            }
        }
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty() && self.live.is_none()
    }

    pub fn len(&self) -> usize {
        self.backups.len() + usize::from(self.live.is_some())
    }
}

/// Expand `~` and glob patterns into a sorted, de-duplicated list of files.
///
/// A pattern that names an existing directory contributes every file below it.
/// Patterns that match nothing contribute nothing.
pub fn expand_globs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let expanded = expand_tilde(pattern);
        if expanded.is_dir() {
            for entry in walkdir::WalkDir::new(&expanded) {
                let entry = entry
                    .with_context(|| format!("Failed to read directory {}", expanded.display()))?;
                if entry.file_type().is_file() {
                    found.insert(entry.into_path());
                }
            }
            continue;
        }

        let pattern_str = expanded.to_string_lossy();
        for entry in
            glob::glob(&pattern_str).with_context(|| format!("Invalid glob pattern {pattern}"))?
        {
            let path = entry?;
            if path.is_file() {
                found.insert(path);
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Absolute path of a configured live file, or `None` with a warning if it
/// does not exist. A missing live file is never fatal: merges go ahead with
/// the backups alone.
pub fn live_file(configured: &str) -> Option<PathBuf> {
    let expanded = expand_tilde(configured);
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);
    if absolute.is_file() {
        Some(absolute)
    } else {
        warn_once(format!(
            "'live_file' provided {configured} but that file doesn't exist"
        ));
        None
    }
}

const PREFIX_LINES: usize = 100;

fn read_prefix(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut lines = Vec::with_capacity(PREFIX_LINES);
    for line in BufReader::new(file).split(b'\n').take(PREFIX_LINES) {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    Ok(lines)
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(path
        .symlink_metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len())
}

/// Drop backups that are a prefix-copy of a larger backup.
///
/// Append-only histories get backed up repeatedly, so most backups are just a
/// truncated copy of a later one. A file whose first 100 lines match a
/// strictly larger file is skipped; the larger copy already holds everything
/// the smaller one does. Histories from different machines start differently
/// and are all kept. Output is ordered largest first.
pub fn filter_subfile_matches(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut sized = paths
        .iter()
        .map(|p| Ok((file_size(p)?, p.clone())))
        .collect::<Result<Vec<_>>>()?;
    sized.sort_by(|a, b| b.0.cmp(&a.0));

    let mut unique: Vec<(u64, Vec<String>, PathBuf)> = Vec::new();
    for (size, path) in sized {
        let prefix = read_prefix(&path)?;
        let covered = unique
            .iter()
            .any(|(u_size, u_prefix, _)| *u_prefix == prefix && *u_size > size);
        if covered {
            tracing::debug!("Ignoring file: {}", path.display());
        } else {
            unique.push((size, prefix, path));
        }
    }

    Ok(unique.into_iter().map(|(_, _, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::capture_logs;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn expand_globs_sorts_and_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("sub.txt")).unwrap();

        let pattern = format!("{}/*.txt", dir.path().display());
        let found = expand_globs(&[pattern.clone(), pattern]).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")]
        );
    }

    #[test]
    fn expand_globs_walks_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/one"), "1").unwrap();
        fs::write(dir.path().join("two"), "2").unwrap();

        let found = expand_globs(&[dir.path().display().to_string()]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&dir.path().join("nested/one")));
    }

    #[test]
    fn expand_globs_with_no_matches_is_empty() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/*.nothing", dir.path().display());
        assert!(expand_globs(&[pattern]).unwrap().is_empty());
    }

    #[test]
    fn missing_live_file_is_none() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("live_history");
        let configured = missing.display().to_string();
        let (resolved, logs) = capture_logs(|| live_file(&configured));
        assert!(resolved.is_none());
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("doesn't exist"), "{logs}");
        assert!(logs.contains(&configured), "{logs}");

        // Once per process per path
        let (again, logs) = capture_logs(|| live_file(&configured));
        assert!(again.is_none());
        assert!(!logs.contains("doesn't exist"), "{logs}");

        fs::write(&missing, "").unwrap();
        assert_eq!(live_file(&missing.display().to_string()), Some(missing));
    }

    #[test]
    fn source_set_order_policies() {
        let set = SourceSet::new(
            vec![PathBuf::from("/b/2020"), PathBuf::from("/b/2021")],
            Some(PathBuf::from("/live")),
        );
        assert_eq!(
            set.ordered(MergeOrder::OldestFirst),
            vec![
                PathBuf::from("/b/2020"),
                PathBuf::from("/b/2021"),
                PathBuf::from("/live")
            ]
        );
        assert_eq!(
            set.ordered(MergeOrder::NewestFirst),
            vec![
                PathBuf::from("/live"),
                PathBuf::from("/b/2021"),
                PathBuf::from("/b/2020")
            ]
        );
        assert_eq!(set.len(), 3);
        assert!(SourceSet::default().is_empty());
    }

    #[test]
    fn filter_subfile_matches_keeps_largest_copy() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small");
        let large = dir.path().join("large");
        let other = dir.path().join("other_machine");
        let lines: Vec<String> = (0..150).map(|i| format!(": {i}:0;echo {i}")).collect();
        fs::write(&small, lines[..120].join("\n")).unwrap();
        fs::write(&large, lines.join("\n")).unwrap();
        fs::write(&other, "alpha\nbeta\n").unwrap();

        let kept = filter_subfile_matches(&[small.clone(), other.clone(), large.clone()]).unwrap();
        assert_eq!(kept, vec![large, other]);
    }

    #[test]
    fn filter_subfile_matches_keeps_equal_sized_copies() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "same\n").unwrap();
        fs::write(&b, "same\n").unwrap();

        let kept = filter_subfile_matches(&[a, b]).unwrap();
        assert_eq!(kept.len(), 2);
    }
}
