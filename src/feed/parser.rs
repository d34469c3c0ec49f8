use chrono::{DateTime, FixedOffset, Utc};
use feed_rs::parser;

use super::Entry;

/// Title used for items that carry none.
pub const NO_TITLE: &str = "(no title)";

/// Format of [`Entry::published_display`].
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Display time zone (UTC+8, Beijing).
const DISPLAY_OFFSET: FixedOffset = match FixedOffset::east_opt(8 * 3600) {
    Some(offset) => offset,
    None => panic!("display offset out of range"),
};

/// Parses feed bytes into at most `limit` entries, preserving source order.
///
/// Accepts anything `feed-rs` understands (RSS 0.9x/1.0/2.0, Atom, JSON Feed).
pub fn parse_entries(bytes: &[u8], limit: usize) -> Result<Vec<Entry>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .take(limit)
        .map(|entry| {
            let published_at = entry.published.or(entry.updated);
            let link = entry
                .links
                .into_iter()
                .next()
                .map(|l| l.href)
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| NO_TITLE.to_string());

            Entry {
                title,
                link,
                // Body-only items, e.g. content:encoded
                summary: entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body)),
                published_display: published_at.map(display_time),
                published_at,
            }
        })
        .collect();

    Ok(entries)
}

/// Renders a UTC timestamp in the display time zone as `YYYY-MM-DD HH:MM:SS`.
pub fn display_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&DISPLAY_OFFSET)
        .format(DISPLAY_TIME_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item>
        <title>First</title>
        <link>https://example.com/1</link>
        <description>Summary &lt;b&gt;one&lt;/b&gt;</description>
        <pubDate>Mon, 08 Jan 2024 01:30:00 +0000</pubDate>
    </item>
    <item>
        <link>https://example.com/2</link>
        <pubDate>Sun, 07 Jan 2024 20:00:00 -0500</pubDate>
    </item>
    <item>
        <title>Undated</title>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_preserves_order_and_defaults() {
        let entries = parse_entries(RSS.as_bytes(), 20).unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].title, "First");
        assert_eq!(entries[0].link, "https://example.com/1");
        assert_eq!(entries[0].summary.as_deref(), Some("Summary <b>one</b>"));

        assert_eq!(entries[1].title, NO_TITLE);
        assert_eq!(entries[2].link, "");
        assert!(entries[2].summary.is_none());
    }

    #[test]
    fn test_timestamps_normalized_to_utc() {
        let entries = parse_entries(RSS.as_bytes(), 20).unwrap();
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 8, 1, 30, 0).unwrap())
        );
        // -0500 evening is the next day in UTC
        assert_eq!(
            entries[1].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 8, 1, 0, 0).unwrap())
        );
        assert!(entries[2].published_at.is_none());
        assert!(entries[2].published_display.is_none());
    }

    #[test]
    fn test_display_time_uses_beijing_offset() {
        let entries = parse_entries(RSS.as_bytes(), 20).unwrap();
        assert_eq!(
            entries[0].published_display.as_deref(),
            Some("2024-01-08 09:30:00")
        );
    }

    #[test]
    fn test_display_time_crosses_midnight() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 20, 0, 0).unwrap();
        assert_eq!(display_time(at), "2024-01-01 04:00:00");
    }

    #[test]
    fn test_limit_truncates_before_anything_else() {
        let entries = parse_entries(RSS.as_bytes(), 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].link, "https://example.com/2");
    }

    #[test]
    fn test_atom_updated_used_when_published_missing() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <id>urn:feed</id>
  <updated>2024-01-08T00:00:00Z</updated>
  <entry>
    <title>Only updated</title>
    <id>urn:entry:1</id>
    <link href="https://example.com/atom/1"/>
    <updated>2024-01-07T12:00:00+08:00</updated>
    <summary>Atom summary</summary>
  </entry>
</feed>"#;
        let entries = parse_entries(atom.as_bytes(), 20).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://example.com/atom/1");
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 7, 4, 0, 0).unwrap())
        );
        assert_eq!(
            entries[0].published_display.as_deref(),
            Some("2024-01-07 12:00:00")
        );
    }

    #[test]
    fn test_summary_falls_back_to_content() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"><channel>
    <title>Example</title>
    <item>
        <title>Body only</title>
        <content:encoded><![CDATA[<p>Full body</p>]]></content:encoded>
    </item>
    <item>
        <title>Both</title>
        <description>Short</description>
        <content:encoded><![CDATA[<p>Long</p>]]></content:encoded>
    </item>
</channel></rss>"#;
        let entries = parse_entries(rss.as_bytes(), 20).unwrap();
        assert!(entries[0].summary.as_deref().unwrap().contains("Full body"));
        assert_eq!(entries[1].summary.as_deref(), Some("Short"));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_entries(b"<not valid xml", 20).is_err());
    }
}
