use crate::digest::FeedDigest;

/// Placeholder for a fetched feed with nothing in the window.
pub const EMPTY_FEED_PLACEHOLDER: &str = "No entries in this window.";

/// Trailer when no feed contributed a single entry.
pub const NO_ENTRIES_MESSAGE: &str = "No new entries found.";

/// Renders the plain-text body.
///
/// Every digest gets a `[name]` section, even when empty. Output depends
/// only on the arguments.
pub fn render_text(digests: &[FeedDigest], window_label: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    if !window_label.is_empty() {
        lines.push(window_label.to_string());
        lines.push(String::new());
    }

    let mut has_items = false;
    for digest in digests {
        lines.push(format!("[{}]", digest.source.name));

        if digest.entries.is_empty() {
            lines.push(format!("   {}", EMPTY_FEED_PLACEHOLDER));
            lines.push(String::new());
            continue;
        }

        has_items = true;
        for (index, entry) in digest.entries.iter().enumerate() {
            lines.push(format!("{}. {}", index + 1, entry.title));
            if let Some(published) = &entry.published_display {
                lines.push(format!("   Published (Beijing): {}", published));
            }
            if let Some(summary) = entry.summary.as_deref().filter(|s| !s.is_empty()) {
                lines.push(format!("   Summary: {}", summary));
            }
            if !entry.link.is_empty() {
                lines.push(format!("   Link: {}", entry.link));
            }
            lines.push(String::new());
        }
    }

    if !has_items {
        lines.push(NO_ENTRIES_MESSAGE.to_string());
    }

    lines.join("\n")
}
