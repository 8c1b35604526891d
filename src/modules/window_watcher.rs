//! Focused-window history: `epoch,duration,application,title` rows, one per
//! focus change, grouped into sessions of the same window.
//!
//! The watcher appends to its live file continuously and is backed up by
//! copying that file, so most backups are a truncated copy of a newer one.
//! Those are dropped before parsing. Rows are keyed on their timestamp only,
//! and the live file is read first so the most recent duration for a
//! timestamp wins.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::csv_rows::CsvRows;
use super::read_bytes;
use crate::cache::{CacheBackend, Memo};
use crate::config::WindowWatcherConfig;
use crate::fingerprint::mtime_fingerprint;
use crate::inputs::{MergeOrder, SourceSet, filter_subfile_matches};
use crate::merge::{Records, merge};
use crate::module::{Module, ModuleStats};
use crate::types::{Dated, ParseError, Res, parse_epoch_seconds};

pub const NAME: &str = "window_watcher";

const ORDER: MergeOrder = MergeOrder::NewestFirst;

/// Longest a window can plausibly stay focused.
const UNLIKELY_SECS: u64 = 3600;
const VERY_UNLIKELY_SECS: u64 = UNLIKELY_SECS * 2;
/// Applications commonly left focused while away; held to the lower limit.
const IDLE_PRONE_APPS: [&str; 2] = ["firefoxdeveloperedition", "Alacritty"];

/// Default gap after which a window's next focus starts a new session.
pub fn session_gap() -> Duration {
    Duration::hours(2)
}

/// One row of the watcher's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinearResult {
    pub dt: DateTime<Utc>,
    /// Seconds the window stayed focused.
    pub duration: u64,
    pub application: String,
    pub window_title: String,
}

impl Dated for LinearResult {
    fn date(&self) -> DateTime<Utc> {
        self.dt
    }
}

/// Consecutive focus periods of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub start_time: DateTime<Utc>,
    /// (focused at, focused for), in order.
    pub times: Vec<(DateTime<Utc>, Duration)>,
    pub application: String,
    pub window_title: String,
}

impl Session {
    fn single(item: &LinearResult) -> Self {
        Self {
            start_time: item.dt,
            times: vec![(item.dt, focus_duration(item))],
            application: item.application.clone(),
            window_title: item.window_title.clone(),
        }
    }

    /// Sum of every focus period, saturating at [`Duration::MAX`].
    pub fn total(&self) -> Duration {
        self.times.iter().fold(Duration::zero(), |total, (_, d)| {
            total.checked_add(d).unwrap_or(Duration::MAX)
        })
    }
}

impl Dated for Session {
    fn date(&self) -> DateTime<Utc> {
        self.start_time
    }
}

fn focus_duration(item: &LinearResult) -> Duration {
    i64::try_from(item.duration)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

pub fn parse_file(path: &Path) -> Records<LinearResult> {
    let bytes = match read_bytes(path) {
        Ok(bytes) => bytes,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    let path = path.to_path_buf();
    Box::new(CsvRows::new(bytes).map(move |row| {
        let row = row.map_err(|e| ParseError::new(&path, Some(e.line), e.reason))?;
        let err = |reason: String| ParseError::new(&path, Some(row.line), reason);
        let [epoch, duration, application, window_title] = row.fields.as_slice() else {
            return Err(err(format!("expected 4 fields, found {}", row.fields.len())));
        };
        Ok(LinearResult {
            dt: parse_epoch_seconds(epoch)
                .ok_or_else(|| err(format!("invalid timestamp {epoch:?}")))?,
            duration: duration
                .trim()
                .parse()
                .map_err(|_| err(format!("invalid duration {duration:?}")))?,
            application: application.clone(),
            window_title: window_title.clone(),
        })
    }))
}

/// Whether a row describes real use rather than a window left open while
/// away, or the watcher failing to identify the window at all.
pub fn is_plausible(e: &LinearResult) -> bool {
    if e.application == "unknown" && e.window_title == "unknown" {
        return false;
    }
    if e.duration > VERY_UNLIKELY_SECS {
        return false;
    }
    !(e.duration > UNLIKELY_SECS && IDLE_PRONE_APPS.contains(&e.application.as_str()))
}

/// Merge explicitly listed files, uncached, in the order given.
pub fn linear_from(paths: &[PathBuf]) -> Records<LinearResult> {
    Box::new(merge(
        NAME,
        paths.iter().map(|p| parse_file(p)).collect(),
        |e: &LinearResult| e.dt,
    ))
}

type WindowKey = (String, String);

/// Group rows into [`Session`]s.
///
/// A row continues the open session of its (application, title) unless more
/// than `gap` passed since that session's last focus period ended.
/// Applications in `force_individual` get one session per row. Sessions are
/// emitted as soon as they close; the ones still open when the input ends
/// follow in start order. Errors pass straight through.
pub fn construct_stream<I>(
    items: I,
    force_individual: HashSet<String>,
    gap: Duration,
) -> impl Iterator<Item = Res<Session>>
where
    I: Iterator<Item = Res<LinearResult>>,
{
    let mut items = items;
    let mut open: HashMap<WindowKey, Vec<(DateTime<Utc>, Duration)>> = HashMap::new();
    let mut outbox: VecDeque<Res<Session>> = VecDeque::new();
    let mut done = false;

    std::iter::from_fn(move || {
        loop {
            if let Some(session) = outbox.pop_front() {
                return Some(session);
            }
            if done {
                return None;
            }
            let item = match items.next() {
                Some(Ok(item)) => item,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    done = true;
                    let mut rest: Vec<Session> = open
                        .drain()
                        .map(|((application, window_title), times)| Session {
                            start_time: times[0].0,
                            times,
                            application,
                            window_title,
                        })
                        .collect();
                    rest.sort_by_key(|s| s.start_time);
                    outbox.extend(rest.into_iter().map(Ok));
                    continue;
                }
            };

            if force_individual.contains(&item.application) {
                return Some(Ok(Session::single(&item)));
            }

            let span = (item.dt, focus_duration(&item));
            let key = (item.application, item.window_title);
            let Some(times) = open.get_mut(&key) else {
                open.insert(key, vec![span]);
                continue;
            };
            let (last_start, last_len) = times[times.len() - 1];
            // A period ending past the last representable instant never closes
            let closes = last_start
                .checked_add_signed(last_len)
                .is_some_and(|last_end| item.dt - last_end > gap);
            if closes {
                let closed = std::mem::replace(times, vec![span]);
                return Some(Ok(Session {
                    start_time: closed[0].0,
                    times: closed,
                    application: key.0,
                    window_title: key.1,
                }));
            }
            times.push(span);
        }
    })
}

pub struct WindowWatcher {
    config: WindowWatcherConfig,
    memo: Memo<[PathBuf], LinearResult>,
}

impl WindowWatcher {
    pub fn new(config: WindowWatcherConfig, store: Arc<dyn CacheBackend>) -> Self {
        let memo = Memo::new(
            NAME,
            store,
            |paths: &[PathBuf]| mtime_fingerprint(paths),
            |paths: &[PathBuf]| linear_from(paths),
        );
        Self { config, memo }
    }

    /// Deduplicated, plausible rows from every distinct input.
    pub fn linear(&self) -> Result<Records<LinearResult>> {
        let rows = self.memo.records(&self.inputs()?)?;
        Ok(Box::new(rows.filter(|row| row.as_ref().map_or(true, is_plausible))))
    }

    pub fn history(&self) -> Result<Records<Session>> {
        let force: HashSet<String> = self.config.force_individual.iter().cloned().collect();
        Ok(Box::new(construct_stream(self.linear()?, force, session_gap())))
    }
}

impl Module for WindowWatcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Result<Vec<PathBuf>> {
        let sources =
            SourceSet::resolve(&self.config.export_path, self.config.live_file.as_deref())?;
        let ordered = sources.ordered(ORDER);
        let kept: HashSet<PathBuf> = filter_subfile_matches(&ordered)?.into_iter().collect();
        Ok(ordered.into_iter().filter(|p| kept.contains(p)).collect())
    }

    fn stats(&self) -> Result<ModuleStats> {
        Ok(ModuleStats::from_records(NAME, self.history()?))
    }

    fn is_available(&self) -> bool {
        !self.config.export_path.is_empty() || self.config.live_file.is_some()
    }
}
