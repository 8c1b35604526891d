use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A record or the error produced while trying to parse it.
///
/// Parsers yield these interleaved so one malformed line never costs the
/// records around it. Callers decide whether to filter, log or stop.
pub type Res<T> = std::result::Result<T, ParseError>;

/// A single malformed record inside an otherwise readable input.
///
/// This is a value, not a failure of the pipeline: it is serializable so it
/// can be cached and replayed alongside the records it was found between.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[error("{path}{}: {reason}", .line.map(|l| format!(":{l}")).unwrap_or_default())]
pub struct ParseError {
    pub path: String,
    pub line: Option<u64>,
    pub reason: String,
}

impl ParseError {
    pub fn new(path: &Path, line: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            line,
            reason: reason.into(),
        }
    }
}

/// Anything with one primary timestamp.
///
/// Every record type exposes its date through this trait so ordering and
/// recency queries work across unrelated record shapes without inspecting
/// fields at runtime.
pub trait Dated {
    fn date(&self) -> DateTime<Utc>;
}

impl<T: Dated> Dated for &T {
    fn date(&self) -> DateTime<Utc> {
        (*self).date()
    }
}

/// Parse an epoch-seconds string the way every history format stores it.
pub fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = raw.trim().parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Drop errors from a record stream, logging each one at debug level.
#[cfg(test)]
pub(crate) fn ok_records<T>(items: impl IntoIterator<Item = Res<T>>) -> impl Iterator<Item = T> {
    items.into_iter().filter_map(|item| match item {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!("skipping malformed record: {e}");
            None
        }
    })
}
