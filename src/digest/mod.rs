//! Time-window selection and multi-feed aggregation.

mod aggregate;
mod window;

pub use aggregate::{build_digests, entry_count, FeedDigest, NoFeedsFetchedError};
pub use window::{select_window, Frequency, Window};
