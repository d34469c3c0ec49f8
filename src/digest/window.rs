use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::feed::{display_time, Entry};

/// How far back a digest reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    pub fn days(self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => f.write_str("daily"),
            Frequency::Weekly => f.write_str("weekly"),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(format!("expected 'daily' or 'weekly', got '{}'", other)),
        }
    }
}

/// A closed UTC interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    frequency: Frequency,
}

impl Window {
    /// The window of `frequency` length ending at `now`.
    pub fn trailing(now: DateTime<Utc>, frequency: Frequency) -> Self {
        Self {
            start: now - Duration::days(frequency.days()),
            end: now,
            frequency,
        }
    }

    /// Human-readable range in the display time zone, e.g.
    /// `Daily window: 2024-01-07 08:00:00 to 2024-01-08 08:00:00 (Beijing)`.
    pub fn label(&self) -> String {
        format!(
            "{} window: {} to {} (Beijing)",
            self.frequency.title(),
            display_time(self.start),
            display_time(self.end)
        )
    }

    pub fn select(&self, entries: Vec<Entry>) -> Vec<Entry> {
        select_window(entries, self.start, self.end)
    }
}

/// Keeps entries published within `[window_start, window_end]`, in input order.
///
/// Entries without a timestamp are always dropped.
pub fn select_window(
    entries: Vec<Entry>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Entry> {
    debug_assert!(window_start <= window_end);

    entries
        .into_iter()
        .filter(|entry| {
            entry
                .published_at
                .is_some_and(|at| window_start <= at && at <= window_end)
        })
        .collect()
}
