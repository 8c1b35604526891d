//! Ordering and recency queries over anything [`Dated`].

use chrono::{DateTime, Duration, Utc};

use crate::types::Dated;

/// An optional limit. `Unbounded` disables the constraint entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound<T> {
    Unbounded,
    Limit(T),
}

impl<T> Bound<T> {
    pub fn limit(&self) -> Option<&T> {
        match self {
            Bound::Unbounded => None,
            Bound::Limit(value) => Some(value),
        }
    }
}

/// Sort by date, oldest first unless `reverse`. Ties keep their input order.
pub fn order_by_date<T, I>(items: I, reverse: bool) -> Vec<T>
where
    T: Dated,
    I: IntoIterator<Item = T>,
{
    let mut items: Vec<T> = items.into_iter().collect();
    if reverse {
        items.sort_by(|a, b| b.date().cmp(&a.date()));
    } else {
        items.sort_by_key(|item| item.date());
    }
    items
}

/// Whether `event` happened less than `range` before `now`.
pub fn within_range(now: DateTime<Utc>, event: DateTime<Utc>, range: Duration) -> bool {
    now - event < range
}

/// How much of the recent past [`most_recent`] returns.
///
/// Both bounds apply at once: the result stops at whichever is hit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recent {
    pub events: Bound<usize>,
    pub time_range: Bound<Duration>,
}

impl Default for Recent {
    fn default() -> Self {
        Self {
            events: Bound::Limit(250),
            time_range: Bound::Limit(Duration::days(30)),
        }
    }
}

impl Recent {
    pub fn unbounded() -> Self {
        Self {
            events: Bound::Unbounded,
            time_range: Bound::Unbounded,
        }
    }
}

/// The newest items, newest first, relative to the current time.
pub fn most_recent<T, I>(items: I, recent: Recent) -> Vec<T>
where
    T: Dated,
    I: IntoIterator<Item = T>,
{
    most_recent_at(items, recent, Utc::now())
}

/// Same as [`most_recent`] against an explicit `now`.
pub fn most_recent_at<T, I>(items: I, recent: Recent, now: DateTime<Utc>) -> Vec<T>
where
    T: Dated,
    I: IntoIterator<Item = T>,
{
    let max_events = recent.events.limit().copied().unwrap_or(usize::MAX);
    order_by_date(items, true)
        .into_iter()
        .enumerate()
        .take_while(|(index, item)| {
            *index < max_events
                && recent
                    .time_range
                    .limit()
                    .is_none_or(|range| within_range(now, item.date(), *range))
        })
        .map(|(_, item)| item)
        .collect()
}
