//! One fetch → filter → render → send cycle.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Settings;
use crate::digest::{build_digests, entry_count, NoFeedsFetchedError, Window};
use crate::feed::Fetcher;
use crate::mail::{build_message, send, Delivery, MailError, MailTransport, SendError};
use crate::render::{render_text, HtmlRenderer};

/// Exit status for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit status for configuration, fetch, composition or delivery failure.
pub const EXIT_FAILURE: u8 = 1;

/// Fatal run errors. Per-feed fetch failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    NoFeedsFetched(#[from] NoFeedsFetchedError),

    #[error(transparent)]
    Compose(#[from] MailError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl RunError {
    /// Whether [`run`] already logged this error with its relay context.
    pub fn is_logged(&self) -> bool {
        matches!(self, RunError::Send(_))
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Sent {
        feeds: usize,
        entries: usize,
        delivery: Delivery,
    },
    /// Nothing matched the window and empty digests are not sent.
    NothingToSend { feeds: usize },
}

/// The rendered digest, ready to be mailed or printed.
#[derive(Debug, Clone)]
pub struct RenderedDigest {
    pub feeds: usize,
    pub entries: usize,
    pub text: String,
    pub html: Option<String>,
}

/// Fetches every feed and renders both bodies for the window ending at `now`.
pub async fn prepare(
    settings: &Settings,
    fetcher: &Fetcher,
    html: &HtmlRenderer,
    now: DateTime<Utc>,
) -> Result<RenderedDigest, NoFeedsFetchedError> {
    let window = Window::trailing(now, settings.frequency);
    tracing::info!(
        feeds = settings.feeds.len(),
        frequency = %settings.frequency,
        start = %window.start,
        end = %window.end,
        "Building digest"
    );

    let digests = build_digests(fetcher, &settings.feeds, &window, settings.entry_limit).await?;
    let label = window.label();

    Ok(RenderedDigest {
        feeds: digests.len(),
        entries: entry_count(&digests),
        text: render_text(&digests, &label),
        html: html.render(&digests, &label),
    })
}

/// Runs one full cycle and delivers the digest through `transport`.
pub async fn run<T: MailTransport>(
    settings: &Settings,
    fetcher: &Fetcher,
    html: &HtmlRenderer,
    transport: &T,
    now: DateTime<Utc>,
) -> Result<RunOutcome, RunError> {
    let digest = prepare(settings, fetcher, html, now).await?;

    if digest.entries == 0 && !settings.send_empty {
        tracing::info!(
            feeds = digest.feeds,
            "No entries in window and empty digests are disabled, nothing to send"
        );
        return Ok(RunOutcome::NothingToSend {
            feeds: digest.feeds,
        });
    }

    let message = build_message(
        &settings.email.subject,
        &settings.email.from,
        settings.email.from_name.as_deref(),
        &settings.email.to,
        &digest.text,
        digest.html.as_deref(),
    )?;

    match send(transport, message).await {
        Ok(delivery) => {
            tracing::info!(
                recipients = %settings.email.to.join(", "),
                entries = digest.entries,
                html = digest.html.is_some(),
                "Email sent"
            );
            Ok(RunOutcome::Sent {
                feeds: digest.feeds,
                entries: digest.entries,
                delivery,
            })
        }
        Err(e) => {
            tracing::error!(
                host = %settings.smtp.host,
                port = settings.smtp.port,
                tls = %settings.smtp.tls_mode(),
                feeds_fetched = digest.feeds,
                entries = digest.entries,
                error = %e,
                "Failed to send email; feeds were fetched but the digest was not delivered"
            );
            Err(e.into())
        }
    }
}

/// Process exit status for a run result.
pub fn exit_code<T>(result: &Result<T, RunError>) -> u8 {
    match result {
        Ok(_) => EXIT_SUCCESS,
        Err(_) => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::testing::MockTransport;
    use crate::mail::SmtpFailure;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
    <item><title>Fresh</title><link>https://example.com/fresh</link><pubDate>Sun, 07 Jan 2024 12:00:00 +0000</pubDate></item>
    <item><title>Stale</title><link>https://example.com/stale</link><pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate></item>
</channel></rss>"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
    }

    fn settings_for(server: &MockServer, extra: &[(&str, &str)]) -> Settings {
        let feeds = format!("News|{}/news", server.uri());
        let mut pairs: Vec<(String, String)> = vec![
            ("RSS_FEEDS".into(), feeds),
            ("SMTP_HOST".into(), "smtp.example.com".into()),
            ("EMAIL_FROM".into(), "bot@example.com".into()),
            ("EMAIL_TO".into(), "me@example.com".into()),
        ];
        pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Settings::from_sources("", move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_sends_digest() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[]);
        let transport = MockTransport::accepting();

        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::builtin(),
            &transport,
            now(),
        )
        .await;

        assert_eq!(exit_code(&result), EXIT_SUCCESS);
        assert_eq!(
            result.unwrap(),
            RunOutcome::Sent {
                feeds: 1,
                entries: 1,
                delivery: Delivery::Accepted
            }
        );
        let delivered = transport.delivered.lock().unwrap();
        let raw = String::from_utf8_lossy(&delivered[0].formatted()).into_owned();
        assert!(raw.contains("Fresh"));
        assert!(!raw.contains("Stale"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[tokio::test]
    async fn test_quirk_reply_exits_zero() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[]);
        let transport = MockTransport::replying(Err(SmtpFailure::Reply {
            code: -1,
            payload: b"\x00\x00\x00".to_vec(),
        }));

        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            &transport,
            now(),
        )
        .await;
        assert_eq!(exit_code(&result), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn test_mailbox_unavailable_exits_one() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[]);
        let transport = MockTransport::replying(Err(SmtpFailure::Reply {
            code: 550,
            payload: b"mailbox unavailable".to_vec(),
        }));

        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            &transport,
            now(),
        )
        .await;
        assert_eq!(exit_code(&result), EXIT_FAILURE);
        assert!(matches!(result, Err(RunError::Send(SendError::Rejected { code: 550, .. }))));
        assert!(result.unwrap_err().is_logged());
    }

    #[tokio::test]
    async fn test_all_feeds_failed_exits_one_without_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let settings = settings_for(&server, &[]);
        let transport = MockTransport::accepting();

        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            &transport,
            now(),
        )
        .await;
        assert_eq!(exit_code(&result), EXIT_FAILURE);
        assert!(matches!(result, Err(RunError::NoFeedsFetched(_))));
        assert!(!result.unwrap_err().is_logged());
        assert_eq!(transport.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_window_sent_by_default() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[]);
        let transport = MockTransport::accepting();

        // A week later nothing is in the daily window
        let later = now() + chrono::Duration::days(7);
        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            &transport,
            later,
        )
        .await;
        assert!(matches!(result, Ok(RunOutcome::Sent { entries: 0, .. })));
        let delivered = transport.delivered.lock().unwrap();
        let raw = String::from_utf8_lossy(&delivered[0].formatted()).into_owned();
        assert!(raw.contains("No new entries found."));
    }

    #[tokio::test]
    async fn test_empty_window_skipped_when_disabled() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[("SEND_EMPTY_DIGEST", "false")]);
        let transport = MockTransport::accepting();

        let later = now() + chrono::Duration::days(7);
        let result = run(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            &transport,
            later,
        )
        .await;
        assert_eq!(exit_code(&result), EXIT_SUCCESS);
        assert_eq!(result.unwrap(), RunOutcome::NothingToSend { feeds: 1 });
        assert_eq!(transport.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_weekly_frequency_widens_window() {
        let server = MockServer::start().await;
        serve(&server, "/news", FEED).await;
        let settings = settings_for(&server, &[("DIGEST_FREQUENCY", "weekly")]);

        let digest = prepare(
            &settings,
            &Fetcher::new(true).unwrap(),
            &HtmlRenderer::disabled(),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(digest.entries, 2);
        assert!(digest.text.starts_with("Weekly window:"));
        assert!(digest.html.is_none());
    }
}
