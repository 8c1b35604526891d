//! Git commits from every repository below the configured roots.
//!
//! Each repository is read with `git log --all` and cached on its own, keyed
//! on the mtime of a ref-tracking file, so only repositories that changed are
//! read again. Repositories are independent and processed on a worker pool.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackend, Memo};
use crate::config::CommitsConfig;
use crate::fingerprint::marker_fingerprint;
use crate::merge::{Records, unique_by, warn_if_empty};
use crate::module::{Module, ModuleStats};
use crate::pool::map_independent;
use crate::types::{Dated, ParseError, Res};
use crate::utils::expand_tilde;

pub const NAME: &str = "commits";

/// Everything under a git dir that changes when any ref moves: commits and
/// checkouts write the reflog and `HEAD`, fetches write `FETCH_HEAD` and
/// remote refs, `gc` rewrites `packed-refs`.
const REF_MARKERS: [&str; 5] = ["logs/HEAD", "FETCH_HEAD", "HEAD", "packed-refs", "refs"];

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%cI%x1f%aI%x1f%ae%x1f%B%x1e";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub committed_dt: DateTime<FixedOffset>,
    pub authored_dt: DateTime<FixedOffset>,
    pub message: String,
    /// Working tree of the repository, or the git dir itself when bare.
    pub repo: String,
    pub sha: String,
    pub author_email: String,
}

impl Dated for Commit {
    fn date(&self) -> DateTime<Utc> {
        self.committed_dt.with_timezone(&Utc)
    }
}

/// Short name of a repository, for display.
pub fn canonical_name(repo: &Path) -> String {
    // GitHub backups are laid out as <name>/repository
    let name = repo.file_name().map(|n| n.to_string_lossy().into_owned());
    match (name.as_deref(), repo.parent().and_then(Path::file_name)) {
        (Some("repository"), Some(parent)) => parent.to_string_lossy().into_owned(),
        (Some(name), _) => name.to_string(),
        (None, _) => repo.to_string_lossy().into_owned(),
    }
}

fn is_git_dir(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir()
}

fn git_root(git_dir: &Path) -> PathBuf {
    match (git_dir.file_name(), git_dir.parent()) {
        (Some(name), Some(parent)) if name == ".git" => parent.to_path_buf(),
        // Bare repository
        _ => git_dir.to_path_buf(),
    }
}

/// The git dir of a repository returned by [`git_repos_in`].
fn git_dir(repo: &Path) -> PathBuf {
    let dot_git = repo.join(".git");
    if dot_git.is_dir() {
        dot_git
    } else {
        repo.to_path_buf()
    }
}

fn inside_git_dir(dir: &Path) -> bool {
    let mut components: Vec<Component> = dir.components().collect();
    components.pop();
    components.iter().any(|c| c.as_os_str() == ".git")
}

/// Every git repository below `roots`, sorted. Repositories nested inside
/// another repository's `.git` (submodule checkouts) are skipped.
pub fn git_repos_in(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut repos = BTreeSet::new();
    for root in roots {
        let walker = walkdir::WalkDir::new(root)
            .into_iter()
            // Object stores are large and never contain a HEAD
            .filter_entry(|e| {
                e.file_name() != "objects" || !e.path().with_file_name("HEAD").is_file()
            });
        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_name() != "HEAD" || !entry.file_type().is_file() {
                continue;
            }
            let Some(candidate) = entry.path().parent() else {
                continue;
            };
            if inside_git_dir(candidate) || !is_git_dir(candidate) {
                continue;
            }
            repos.insert(git_root(candidate));
        }
    }
    repos.into_iter().collect()
}

/// Parse `git log` output produced with [`LOG_FORMAT`].
pub fn parse_log(repo: &Path, output: &str) -> Vec<Res<Commit>> {
    let repo_name = repo.to_string_lossy().into_owned();
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.is_empty())
        .map(|record| {
            let err = |reason: String| ParseError::new(repo, None, reason);
            let mut fields = record.splitn(5, FIELD_SEP);
            let (Some(sha), Some(committed), Some(authored), Some(email), Some(body)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                return Err(err(format!("truncated log record {record:?}")));
            };
            let parse_date = |raw: &str| {
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| err(format!("commit {sha}: invalid date {raw:?}: {e}")))
            };
            Ok(Commit {
                committed_dt: parse_date(committed)?,
                authored_dt: parse_date(authored)?,
                message: body.trim().to_string(),
                repo: repo_name.clone(),
                sha: sha.to_string(),
                author_email: email.to_string(),
            })
        })
        .collect()
}

/// Every commit reachable from any ref of `repo`.
pub fn repo_commits(repo: &Path) -> Vec<Res<Commit>> {
    tracing::info!("processing {}", repo.display());
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["log", "--all", LOG_FORMAT])
        .output();
    match output {
        Ok(out) if out.status.success() => parse_log(repo, &String::from_utf8_lossy(&out.stdout)),
        Ok(out) => vec![Err(ParseError::new(
            repo,
            None,
            format!(
                "git log failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        ))],
        Err(e) => vec![Err(ParseError::new(repo, None, format!("failed to run git: {e}")))],
    }
}

/// Authored by one of `emails`. No emails configured keeps everything.
pub fn by_me(emails: &[String], commit: &Commit) -> bool {
    emails.is_empty() || emails.contains(&commit.author_email)
}

fn ensure_git() -> Result<()> {
    let status = Command::new("git")
        .arg("--version")
        .output()
        .context("Failed to run git, is it installed?")?
        .status;
    anyhow::ensure!(status.success(), "git --version exited with {status}");
    Ok(())
}

pub struct Commits {
    config: CommitsConfig,
    memo: Memo<Path, Commit>,
}

impl Commits {
    pub fn new(config: CommitsConfig, store: Arc<dyn CacheBackend>) -> Self {
        let memo = Memo::new(
            NAME,
            store,
            |repo: &Path| marker_fingerprint(&git_dir(repo), &REF_MARKERS),
            |repo: &Path| repo_commits(repo).into_iter(),
        );
        Self { config, memo }
    }

    fn roots(&self) -> Result<Vec<PathBuf>> {
        let mut roots = Vec::new();
        for pattern in &self.config.roots {
            let expanded = expand_tilde(pattern);
            for entry in glob::glob(&expanded.to_string_lossy())
                .with_context(|| format!("Invalid glob pattern {pattern}"))?
            {
                let path = entry?;
                if path.is_dir() {
                    roots.push(path);
                }
            }
        }
        Ok(roots)
    }

    /// Commits by the configured authors across every repository, each sha
    /// once, in repository order.
    pub fn commits(&self) -> Result<Records<Commit>> {
        ensure_git()?;
        let repos = self.inputs()?;
        let per_repo = map_independent(repos, self.config.workers, |repo| {
            self.memo.call(&repo).map(|commits| commits.collect::<Vec<_>>())
        })?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let emails = self.config.emails.clone();
        let mine = per_repo
            .into_iter()
            .flatten()
            .filter(move |item| item.as_ref().map_or(true, |c| by_me(&emails, c)));
        Ok(Box::new(warn_if_empty(
            NAME,
            unique_by(mine, |c: &Commit| c.sha.clone()),
        )))
    }
}

impl Module for Commits {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Result<Vec<PathBuf>> {
        Ok(git_repos_in(&self.roots()?))
    }

    fn stats(&self) -> Result<ModuleStats> {
        Ok(ModuleStats::from_records(NAME, self.commits()?))
    }

    fn is_available(&self) -> bool {
        !self.config.roots.is_empty()
    }
}
