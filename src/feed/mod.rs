//! Feed ingestion: HTTP retrieval and RSS/Atom parsing.
//!
//! - [`fetcher`] - HTTP fetching with timeout, size limit, and status checks
//! - [`parser`] - Conversion of feed bytes into [`Entry`] values via `feed-rs`
//!
//! # Example
//!
//! ```ignore
//! use rss_digest::feed::Fetcher;
//!
//! let fetcher = Fetcher::new(true)?;
//! let entries = fetcher.fetch("https://example.com/feed.xml", 20).await?;
//! ```

mod fetcher;
mod parser;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use fetcher::{FetchError, Fetcher, FETCH_TIMEOUT, USER_AGENT};
pub use parser::{display_time, parse_entries, DISPLAY_TIME_FORMAT, NO_TITLE};

/// One configured subscription. `name` labels the feed in the digest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A single feed item, normalized for the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    /// First link of the item, or empty when the item has none.
    pub link: String,
    /// Summary exactly as the source delivered it (may contain HTML).
    pub summary: Option<String>,
    /// Publish time (falling back to update time), normalized to UTC.
    pub published_at: Option<DateTime<Utc>>,
    /// `published_at` rendered in the display time zone.
    pub published_display: Option<String>,
}
