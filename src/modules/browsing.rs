//! Browser history from sqlite databases: Firefox `places.sqlite` and the
//! `History` file of Chromium-based browsers.
//!
//! Backups are dated copies that are never modified once written, so the
//! merge of all of them is cached on their sorted paths alone. Live databases
//! are held open by the browser; they are copied before reading and merged in
//! uncached on every call.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackend, Memo};
use crate::config::BrowsingConfig;
use crate::fingerprint::path_fingerprint;
use crate::inputs::expand_globs;
use crate::merge::{Records, merge};
use crate::module::{Module, ModuleStats};
use crate::types::{Dated, ParseError, Res};

pub const NAME: &str = "browsing";

/// Microseconds between 1601-01-01, Chromium's epoch, and the unix epoch.
const CHROMIUM_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Browser {
    Firefox,
    Chromium,
}

impl Browser {
    fn query(self) -> &'static str {
        match self {
            Browser::Firefox => {
                "SELECT p.url, v.visit_date, p.title, NULL
                 FROM moz_historyvisits v JOIN moz_places p ON p.id = v.place_id
                 ORDER BY v.visit_date"
            }
            Browser::Chromium => {
                "SELECT u.url, v.visit_time, u.title, v.visit_duration
                 FROM visits v JOIN urls u ON u.id = v.url
                 ORDER BY v.visit_time"
            }
        }
    }

    fn visit_time(self, micros: i64) -> Option<DateTime<Utc>> {
        let unix = match self {
            Browser::Firefox => micros,
            Browser::Chromium => micros.checked_sub(CHROMIUM_EPOCH_OFFSET_MICROS)?,
        };
        DateTime::from_timestamp_micros(unix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visit {
    pub url: String,
    pub dt: DateTime<Utc>,
    pub title: Option<String>,
    /// Seconds on the page, only recorded by Chromium.
    pub duration: Option<u64>,
    pub browser: Browser,
}

impl Dated for Visit {
    fn date(&self) -> DateTime<Utc> {
        self.dt
    }
}

fn merge_key(v: &Visit) -> (String, DateTime<Utc>) {
    (v.url.clone(), v.dt)
}

fn detect_browser(conn: &Connection) -> rusqlite::Result<Option<Browser>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;

    let has = |names: &[&str]| names.iter().all(|n| tables.contains(*n));
    Ok(if has(&["moz_places", "moz_historyvisits"]) {
        Some(Browser::Firefox)
    } else if has(&["urls", "visits"]) {
        Some(Browser::Chromium)
    } else {
        None
    })
}

fn query_visits(conn: &Connection, path: &Path) -> rusqlite::Result<Vec<Res<Visit>>> {
    let Some(browser) = detect_browser(conn)? else {
        return Ok(vec![Err(ParseError::new(
            path,
            None,
            "not a Firefox or Chromium history database",
        ))]);
    };

    let mut stmt = conn.prepare(browser.query())?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let visits = rows
        .map(|row| -> Res<Visit> {
            let (url, stamp, title, duration) =
                row.map_err(|e| ParseError::new(path, None, format!("unreadable visit: {e}")))?;
            let dt = browser.visit_time(stamp).ok_or_else(|| {
                ParseError::new(path, None, format!("visit time {stamp} out of range"))
            })?;
            Ok(Visit {
                url,
                dt,
                title: title.filter(|t| !t.is_empty()),
                duration: duration
                    .filter(|micros| *micros > 0)
                    .and_then(|micros| u64::try_from(micros / 1_000_000).ok()),
                browser,
            })
        })
        .collect();
    Ok(visits)
}

/// Open a backup in read-only mode.
fn open_backup(path: &Path) -> rusqlite::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

type Opener = fn(&Path) -> rusqlite::Result<Connection>;

fn read_database(path: &Path, open: Opener) -> Vec<Res<Visit>> {
    match open(path).and_then(|conn| query_visits(&conn, path)) {
        Ok(visits) => visits,
        Err(e) => vec![Err(ParseError::new(path, None, format!("failed to read database: {e}")))],
    }
}

/// Lazily read one backed-up database. Nothing is opened until the first
/// item is requested.
pub fn parse_file(path: &Path) -> Records<Visit> {
    let path = path.to_path_buf();
    Box::new(std::iter::once(path).flat_map(|path| read_database(&path, open_backup)))
}

/// Merge explicitly listed backups, uncached, in the order given.
pub fn history_from(paths: &[PathBuf]) -> Records<Visit> {
    Box::new(merge(
        NAME,
        paths.iter().map(|p| parse_file(p)).collect(),
        merge_key,
    ))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Copy a database, and its write-ahead log if there is one, into a scratch
/// directory. The copy lives as long as the returned directory.
fn copy_database(path: &Path) -> Result<(tempfile::TempDir, PathBuf)> {
    let scratch = tempfile::Builder::new()
        .prefix("hpi-browsing")
        .tempdir()
        .context("Failed to create scratch directory")?;
    let name = path
        .file_name()
        .with_context(|| format!("No file name in {}", path.display()))?;
    let copy = scratch.path().join(name);
    fs::copy(path, &copy).with_context(|| format!("Failed to copy {}", path.display()))?;

    let wal = with_suffix(path, "-wal");
    if wal.is_file() {
        fs::copy(&wal, with_suffix(&copy, "-wal"))
            .with_context(|| format!("Failed to copy {}", wal.display()))?;
    }
    Ok((scratch, copy))
}

/// Every visit in a database a browser may be writing to right now.
pub fn read_live(path: &Path) -> Vec<Res<Visit>> {
    match copy_database(path) {
        // Read-write so sqlite can replay the copied log
        Ok((_scratch, copy)) => read_database(&copy, |p| Connection::open(p))
            .into_iter()
            .map(|item| {
                item.map_err(|mut e| {
                    e.path = path.to_string_lossy().into_owned();
                    e
                })
            })
            .collect(),
        Err(e) => vec![Err(ParseError::new(path, None, format!("{e:#}")))],
    }
}

pub struct Browsing {
    config: BrowsingConfig,
    backups: Memo<[PathBuf], Visit>,
}

impl Browsing {
    pub fn new(config: BrowsingConfig, store: Arc<dyn CacheBackend>) -> Self {
        let backups = Memo::new(
            NAME,
            store,
            |paths: &[PathBuf]| Ok(path_fingerprint(paths)),
            |paths: &[PathBuf]| history_from(paths),
        );
        Self { config, backups }
    }

    pub fn backup_inputs(&self) -> Result<Vec<PathBuf>> {
        expand_globs(&self.config.export_path)
    }

    pub fn live_databases(&self) -> Result<Vec<PathBuf>> {
        expand_globs(&self.config.live_databases)
    }

    /// Every visit from the backups and the live databases, deduplicated on
    /// (url, time).
    pub fn history(&self) -> Result<Records<Visit>> {
        let backups = self.backups.records(&self.backup_inputs()?)?;
        let live = self.live_databases()?;
        tracing::debug!("live databases: {live:?}");
        let live: Records<Visit> = Box::new(live.into_iter().flat_map(|db| read_live(&db)));
        Ok(Box::new(merge(NAME, vec![backups, live], merge_key)))
    }
}

impl Module for Browsing {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Result<Vec<PathBuf>> {
        let mut inputs = self.backup_inputs()?;
        inputs.extend(self.live_databases()?);
        Ok(inputs)
    }

    fn stats(&self) -> Result<ModuleStats> {
        Ok(ModuleStats::from_records(NAME, self.history()?))
    }

    fn is_available(&self) -> bool {
        !self.config.export_path.is_empty() || !self.config.live_databases.is_empty()
    }
}
