use thiserror::Error;

use super::window::Window;
use crate::feed::{Entry, FeedSource, Fetcher};

/// Every configured feed failed to fetch.
#[derive(Debug, Error)]
#[error("No RSS feeds were fetched successfully ({attempted} attempted)")]
pub struct NoFeedsFetchedError {
    pub attempted: usize,
}

/// The in-window entries of one successfully fetched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDigest {
    pub source: FeedSource,
    pub entries: Vec<Entry>,
}

impl FeedDigest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Total number of entries across all digests.
pub fn entry_count(digests: &[FeedDigest]) -> usize {
    digests.iter().map(|d| d.entries.len()).sum()
}

/// Fetches and filters every feed in turn, one request at a time.
///
/// A feed that fails to fetch is logged and left out of the result; it does
/// not stop the run. Feeds that fetch fine but have nothing in the window
/// still produce a (empty) [`FeedDigest`].
///
/// # Errors
///
/// [`NoFeedsFetchedError`] when no feed could be fetched at all.
pub async fn build_digests(
    fetcher: &Fetcher,
    feeds: &[FeedSource],
    window: &Window,
    limit: usize,
) -> Result<Vec<FeedDigest>, NoFeedsFetchedError> {
    let mut digests = Vec::with_capacity(feeds.len());

    for source in feeds {
        let entries = match fetcher.fetch(&source.url, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    feed = %source.name,
                    url = %source.url,
                    error = %e,
                    "Failed to fetch RSS feed"
                );
                continue;
            }
        };

        let fetched = entries.len();
        let entries = window.select(entries);
        tracing::info!(
            feed = %source.name,
            fetched = fetched,
            entries = entries.len(),
            "Fetched feed"
        );

        digests.push(FeedDigest {
            source: source.clone(),
            entries,
        });
    }

    if digests.is_empty() {
        return Err(NoFeedsFetchedError {
            attempted: feeds.len(),
        });
    }

    let skipped = feeds.len() - digests.len();
    if skipped > 0 {
        tracing::warn!(
            skipped = skipped,
            fetched = digests.len(),
            "Some feeds failed and are missing from this digest"
        );
    }

    Ok(digests)
}
