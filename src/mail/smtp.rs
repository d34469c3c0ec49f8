use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::{ClientId, Extension, MailBodyParameter, MailParameter};
use lettre::Message;
use secrecy::ExposeSecret;
use std::fmt;
use std::time::Duration;

use super::{MailTransport, SendError, SmtpFailure};
use crate::config::{SmtpSettings, TlsMode};

/// Timeout applied when opening the SMTP connection.
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where in the SMTP session a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Greeting, EHLO, STARTTLS and AUTH.
    Session,
    /// MAIL FROM, RCPT TO and DATA.
    Envelope,
    /// The reply to the end of the message body.
    Message,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Session => "session setup",
            Stage::Envelope => "envelope",
            Stage::Message => "message body",
        })
    }
}

/// Production [`MailTransport`]: one lettre connection per delivery.
///
/// The transaction is driven command by command so a failure can be tied to
/// the stage it happened in. Only the reply to the end of the message body is
/// ever reported as an unparseable `-1` reply.
pub struct SmtpTransport {
    host: String,
    port: u16,
    tls: TlsMode,
    tls_parameters: Option<TlsParameters>,
    credentials: Option<Credentials>,
    hello_name: ClientId,
}

impl SmtpTransport {
    /// Configures (but does not open) a connection to the relay.
    ///
    /// Credentials are only attached when a username is configured.
    pub fn new(settings: &SmtpSettings) -> Result<Self, SendError> {
        let tls = settings.tls_mode();

        let tls_parameters = match tls {
            TlsMode::None => None,
            TlsMode::Implicit | TlsMode::StartTls => Some(
                TlsParameters::new(settings.host.clone())
                    .map_err(|e| SendError::Transport(format!("Failed to set up TLS: {}", e)))?,
            ),
        };

        let credentials = settings.username.as_ref().map(|username| {
            let password = settings
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            Credentials::new(username.clone(), password)
        });

        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            tls,
            tls_parameters,
            credentials,
            hello_name: ClientId::default(),
        })
    }

    async fn open(&self) -> Result<AsyncSmtpConnection, lettre::transport::smtp::Error> {
        let wrapper = match self.tls {
            TlsMode::Implicit => self.tls_parameters.clone(),
            _ => None,
        };

        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (self.host.as_str(), self.port),
            Some(SMTP_TIMEOUT),
            &self.hello_name,
            wrapper,
            None,
        )
        .await?;

        if self.tls == TlsMode::StartTls {
            if let Some(parameters) = &self.tls_parameters {
                conn.starttls(parameters.clone(), &self.hello_name).await?;
            }
        }

        if let Some(credentials) = &self.credentials {
            conn.auth(DEFAULT_MECHANISMS, credentials).await?;
        }

        Ok(conn)
    }

    async fn transact(
        &self,
        conn: &mut AsyncSmtpConnection,
        envelope: &Envelope,
        body: &[u8],
    ) -> Result<(), SmtpFailure> {
        let parameters = mail_parameters(conn, envelope, body)?;
        let at_envelope = |e: lettre::transport::smtp::Error| classify(e, Stage::Envelope);

        conn.command(Mail::new(envelope.from().cloned(), parameters))
            .await
            .map_err(at_envelope)?;
        for recipient in envelope.to() {
            conn.command(Rcpt::new(recipient.clone(), vec![]))
                .await
                .map_err(at_envelope)?;
        }
        conn.command(Data).await.map_err(at_envelope)?;

        let response = conn
            .message(body)
            .await
            .map_err(|e| classify(e, Stage::Message))?;
        tracing::debug!(code = %response.code(), "SMTP relay accepted message");
        Ok(())
    }
}

impl MailTransport for SmtpTransport {
    fn describe(&self) -> String {
        format!("{}:{} ({})", self.host, self.port, self.tls)
    }

    async fn deliver(&self, message: Message) -> Result<(), SmtpFailure> {
        let envelope = message.envelope().clone();
        let body = message.formatted();

        let mut conn = self
            .open()
            .await
            .map_err(|e| classify(e, Stage::Session))?;
        let result = self.transact(&mut conn, &envelope, &body).await;
        conn.abort().await;
        result
    }
}

/// MAIL FROM parameters for non-ASCII content, when the relay supports them.
fn mail_parameters(
    conn: &AsyncSmtpConnection,
    envelope: &Envelope,
    body: &[u8],
) -> Result<Vec<MailParameter>, SmtpFailure> {
    let mut parameters = Vec::new();
    let server = conn.server_info();

    let non_ascii_address = envelope
        .from()
        .into_iter()
        .chain(envelope.to())
        .any(|address| !AsRef::<str>::as_ref(address).is_ascii());
    if non_ascii_address {
        if !server.supports_feature(Extension::SmtpUtfEight) {
            return Err(SmtpFailure::Transport(
                "Recipient addresses need SMTPUTF8, which the relay does not offer".to_string(),
            ));
        }
        parameters.push(MailParameter::SmtpUtfEight);
    }

    if !body.is_ascii() {
        if !server.supports_feature(Extension::EightBitMime) {
            return Err(SmtpFailure::Transport(
                "Message needs 8BITMIME, which the relay does not offer".to_string(),
            ));
        }
        parameters.push(MailParameter::Body(MailBodyParameter::EightBitMime));
    }

    Ok(parameters)
}

/// Maps a lettre error onto a reply code and payload.
///
/// A reply with a status keeps its code and text. A reply lettre could not
/// parse becomes code `-1` carrying the raw line, but only for the reply to
/// the message body; earlier in the session it is a transport failure.
/// Connection loss, truncated replies and oversized replies are transport
/// failures at any stage.
fn classify(err: lettre::transport::smtp::Error, stage: Stage) -> SmtpFailure {
    let detail = std::error::Error::source(&err).map(|s| s.to_string());

    if let Some(code) = err.status() {
        return SmtpFailure::Reply {
            code: i32::from(u16::from(code)),
            payload: detail.unwrap_or_default().into_bytes(),
        };
    }

    if err.is_response() {
        if let Some(raw) = detail.as_deref().and_then(unparsed_reply) {
            if stage == Stage::Message {
                return SmtpFailure::Reply {
                    code: -1,
                    payload: raw.as_bytes().to_vec(),
                };
            }
            return SmtpFailure::Transport(format!(
                "Unparseable SMTP reply during {}: {:?}",
                stage, raw
            ));
        }
    }

    SmtpFailure::Transport(format!("{} during {}", err, stage))
}

/// Recovers the raw reply line from lettre's parse failure text.
///
/// lettre reports an unparseable reply as `error <kind> at: <unparsed input>`.
/// Other response errors (`incomplete response`, oversized replies) do not
/// carry a reply and yield `None`.
fn unparsed_reply(detail: &str) -> Option<&str> {
    let (prefix, rest) = detail.split_once(" at: ")?;
    if !prefix.starts_with("error ") {
        return None;
    }
    Some(rest.strip_suffix("\r\n").unwrap_or(rest))
}
