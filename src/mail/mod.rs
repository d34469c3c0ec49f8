//! Digest message composition and SMTP delivery.
//!
//! - [`build_message`] - MIME message with a text body and optional HTML alternative
//! - [`send`] - one delivery attempt through a [`MailTransport`]
//! - [`SmtpTransport`] - the lettre-backed transport used in production
//!
//! Some relays answer with an unparseable reply (code `-1`, payload of NUL
//! bytes) after they have already accepted the message. [`send`] reports that
//! reply as [`Delivery::AcceptedWithQuirk`] instead of failing.

mod smtp;

use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use thiserror::Error;

pub use smtp::{SmtpTransport, SMTP_TIMEOUT};

/// Problems composing the message. Raised before any network activity.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email message: {0}")]
    Build(#[from] lettre::error::Error),
}

/// Delivery failed and the message must be considered unsent.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("SMTP server replied {code}: {message}")]
    Rejected { code: i32, message: String },

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// What went wrong inside one SMTP transaction, before quirk handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpFailure {
    /// A non-success reply. `code` is `-1` when the reply had no parseable code.
    Reply { code: i32, payload: Vec<u8> },
    /// Connection, TLS, timeout or protocol failure without a server reply.
    Transport(String),
}

impl SmtpFailure {
    /// Code `-1` with an empty or all-NUL payload.
    pub fn is_known_quirk(&self) -> bool {
        match self {
            SmtpFailure::Reply { code: -1, payload } => payload.iter().all(|b| *b == 0),
            _ => false,
        }
    }
}

impl From<SmtpFailure> for SendError {
    fn from(failure: SmtpFailure) -> Self {
        match failure {
            SmtpFailure::Reply { code, payload } => SendError::Rejected {
                code,
                message: String::from_utf8_lossy(&payload).into_owned(),
            },
            SmtpFailure::Transport(reason) => SendError::Transport(reason),
        }
    }
}

/// How a successful [`send`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The relay sent the `-1`/NUL reply after taking the message.
    AcceptedWithQuirk,
}

/// One SMTP transaction carrying one message to all of its recipients.
#[allow(async_fn_in_trait)]
pub trait MailTransport {
    /// `host:port (tls mode)`, for log lines.
    fn describe(&self) -> String;

    async fn deliver(&self, message: Message) -> Result<(), SmtpFailure>;
}

/// Builds the digest message.
///
/// The text body is always present. With `html_body` the message becomes
/// `multipart/alternative` so clients can pick HTML and fall back to text.
pub fn build_message(
    subject: &str,
    sender: &str,
    sender_name: Option<&str>,
    recipients: &[String],
    text_body: &str,
    html_body: Option<&str>,
) -> Result<Message, MailError> {
    let from = Mailbox::new(
        sender_name.filter(|n| !n.trim().is_empty()).map(str::to_string),
        parse_address(sender)?,
    );

    let mut builder = Message::builder().from(from).subject(subject);
    for recipient in recipients {
        builder = builder.to(Mailbox::new(None, parse_address(recipient)?));
    }

    let message = match html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            text_body.to_string(),
            html.to_string(),
        ))?,
        None => builder.singlepart(SinglePart::plain(text_body.to_string()))?,
    };

    Ok(message)
}

fn parse_address(raw: &str) -> Result<Address, MailError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| MailError::InvalidAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Delivers `message` in a single attempt.
///
/// The known `-1`/NUL reply counts as delivered; every other failure is a
/// [`SendError`]. Nothing is retried.
pub async fn send<T: MailTransport>(transport: &T, message: Message) -> Result<Delivery, SendError> {
    match transport.deliver(message).await {
        Ok(()) => Ok(Delivery::Accepted),
        Err(failure) if failure.is_known_quirk() => {
            tracing::warn!(
                relay = %transport.describe(),
                "SMTP relay returned code -1 with an empty payload after accepting the message, treating as delivered"
            );
            Ok(Delivery::AcceptedWithQuirk)
        }
        Err(failure) => Err(failure.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;

    fn recipients() -> Vec<String> {
        vec!["a@example.com".to_string(), "b@example.com".to_string()]
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    fn text_message() -> Message {
        build_message("Digest", "bot@example.com", None, &recipients(), "hello", None).unwrap()
    }

    #[test]
    fn test_text_only_message() {
        let raw = formatted(&text_message());
        assert!(raw.contains("Subject: Digest"));
        assert!(raw.contains("From: bot@example.com"));
        assert!(raw.contains("To: a@example.com, b@example.com"));
        assert!(raw.contains("text/plain"));
        assert!(!raw.contains("multipart/alternative"));
        assert!(raw.contains("hello"));
    }

    #[test]
    fn test_html_becomes_alternative() {
        let message = build_message(
            "Digest",
            "bot@example.com",
            Some("Digest Bot"),
            &recipients(),
            "plain body",
            Some("<p>html body</p>"),
        )
        .unwrap();
        let raw = formatted(&message);
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("\"Digest Bot\" <bot@example.com>") || raw.contains("Digest Bot <bot@example.com>"));
        // text part precedes the html part
        assert!(raw.find("text/plain").unwrap() < raw.find("text/html").unwrap());
    }

    #[test]
    fn test_envelope_has_every_recipient() {
        let message = text_message();
        let to: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(to, recipients());
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let err = build_message("s", "not-an-address", None, &recipients(), "b", None).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { ref address, .. } if address == "not-an-address"));

        let bad_to = vec!["ok@example.com".to_string(), "@nope".to_string()];
        let err = build_message("s", "bot@example.com", None, &bad_to, "b", None).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }

    #[test]
    fn test_known_quirk_signature() {
        assert!(SmtpFailure::Reply { code: -1, payload: vec![0, 0, 0] }.is_known_quirk());
        assert!(SmtpFailure::Reply { code: -1, payload: vec![] }.is_known_quirk());
        assert!(!SmtpFailure::Reply { code: -1, payload: b"garbage".to_vec() }.is_known_quirk());
        assert!(!SmtpFailure::Reply { code: 550, payload: vec![0, 0, 0] }.is_known_quirk());
        assert!(!SmtpFailure::Transport("reset".into()).is_known_quirk());
    }

    #[tokio::test]
    async fn test_send_accepted() {
        let transport = MockTransport::accepting();
        let delivery = send(&transport, text_message()).await.unwrap();
        assert_eq!(delivery, Delivery::Accepted);
        assert_eq!(transport.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_send_quirk_is_success() {
        let transport = MockTransport::replying(Err(SmtpFailure::Reply {
            code: -1,
            payload: b"\x00\x00\x00".to_vec(),
        }));
        let delivery = send(&transport, text_message()).await.unwrap();
        assert_eq!(delivery, Delivery::AcceptedWithQuirk);
    }

    #[tokio::test]
    async fn test_send_rejection_is_error() {
        let transport = MockTransport::replying(Err(SmtpFailure::Reply {
            code: 550,
            payload: b"mailbox unavailable".to_vec(),
        }));
        let err = send(&transport, text_message()).await.unwrap_err();
        match err {
            SendError::Rejected { code, message } => {
                assert_eq!(code, 550);
                assert_eq!(message, "mailbox unavailable");
            }
            e => panic!("Expected Rejected, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_send_transport_failure_is_error() {
        let transport =
            MockTransport::replying(Err(SmtpFailure::Transport("connection reset".into())));
        let err = send(&transport, text_message()).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}
