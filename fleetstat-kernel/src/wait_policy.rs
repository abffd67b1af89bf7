//! Which of a target's monitors the controller blocks on.
//!
//! Under `LongestExpected` the monitors whose expected duration equals the
//! maximum are primary (ties are all primary) and the rest are background.
//! Blocking on the longest ones costs `max(expected)` of wall-clock time,
//! never the sum.
//!
//! Background monitors are detached: their exit status is never collected
//! and their failures never surface. Downstream log consumers rely on them
//! terminating by themselves. `WaitAll` turns every monitor primary.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    #[default]
    LongestExpected,
    WaitAll,
}

/// Result of splitting a set of monitors.
#[derive(Debug)]
pub struct Partition<T> {
    pub primary: Vec<T>,
    pub background: Vec<T>,
    /// `None` for an empty input.
    pub max_duration: Option<Duration>,
}

impl WaitPolicy {
    /// Splits `items` into primary and background, preserving input order.
    pub fn partition<T, F>(self, items: Vec<T>, expected: F) -> Partition<T>
    where
        F: Fn(&T) -> Duration,
    {
        let max_duration = items.iter().map(&expected).max();
        let (primary, background) = match (self, max_duration) {
            (WaitPolicy::WaitAll, _) | (_, None) => (items, Vec::new()),
            (WaitPolicy::LongestExpected, Some(max)) => items.into_iter().partition(|item| expected(item) == max),
        };
        Partition { primary, background, max_duration }
    }
}
