//! Run settings, resolved from an optional TOML file and environment variables.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, the environment.
//! The config file is optional; a missing file means environment-only
//! configuration. The result is validated once and never mutated afterwards.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::digest::Frequency;
use crate::feed::FeedSource;

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_ENTRY_LIMIT: usize = 20;
pub const DEFAULT_SUBJECT: &str = "Daily RSS Digest";
pub const DEFAULT_FEED_NAME: &str = "RSS";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Settings
// ============================================================================

/// How the SMTP connection is secured. Exactly one mode applies per send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (usually port 465).
    Implicit,
    /// Plaintext connect, then a mandatory STARTTLS upgrade (usually port 587).
    StartTls,
    /// No encryption.
    None,
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TlsMode::Implicit => "implicit-tls",
            TlsMode::StartTls => "starttls",
            TlsMode::None => "none",
        };
        f.write_str(name)
    }
}

/// SMTP relay endpoint and credentials.
///
/// Custom Debug impl masks `password`.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub starttls: bool,
    pub ssl: bool,
}

impl SmtpSettings {
    /// Implicit TLS wins when both flags are set.
    pub fn tls_mode(&self) -> TlsMode {
        if self.ssl {
            TlsMode::Implicit
        } else if self.starttls {
            TlsMode::StartTls
        } else {
            TlsMode::None
        }
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("starttls", &self.starttls)
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Envelope and header settings for the digest message.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct HtmlSettings {
    pub enabled: bool,
    /// Custom template; `None` selects the built-in one.
    pub template: Option<PathBuf>,
}

/// Validated parameters for one run.
///
/// Invariants: at least one feed, at least one recipient, non-empty SMTP
/// host, entry limit of at least 1.
#[derive(Debug, Clone)]
pub struct Settings {
    pub feeds: Vec<FeedSource>,
    pub verify_tls: bool,
    pub entry_limit: usize,
    pub frequency: Frequency,
    /// Send a digest even when no feed has entries in the window.
    pub send_empty: bool,
    pub smtp: SmtpSettings,
    pub email: EmailSettings,
    pub html: HtmlSettings,
}

// ============================================================================
// File Layout
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    feeds: Vec<FeedSource>,
    verify_tls: Option<bool>,
    entry_limit: Option<usize>,
    frequency: Option<Frequency>,
    send_empty: Option<bool>,
    smtp: FileSmtp,
    email: FileEmail,
    html: FileHtml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSmtp {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    starttls: Option<bool>,
    ssl: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileEmail {
    from: Option<String>,
    from_name: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileHtml {
    enabled: Option<bool>,
    template: Option<PathBuf>,
}

const KNOWN_KEYS: [&str; 8] = [
    "feeds",
    "verify_tls",
    "entry_limit",
    "frequency",
    "send_empty",
    "smtp",
    "email",
    "html",
];

impl FileConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// - Missing file → `Ok(FileConfig::default())`
    /// - Empty file → `Ok(FileConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    fn read(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using environment");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl Settings {
    /// Loads `path` (if present) and overlays the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = FileConfig::read(path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolves settings from TOML text and an environment lookup.
    pub fn from_sources<F>(toml: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(FileConfig::parse(toml)?, env)
    }

    fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank variables count as unset
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let feeds = if let Some(raw) = var("RSS_FEEDS") {
            parse_feed_list(&raw)?
        } else if let Some(url) = var("RSS_FEED_URL") {
            let name = var("RSS_FEED_NAME").unwrap_or_else(|| DEFAULT_FEED_NAME.to_string());
            vec![FeedSource::new(name.trim(), url.trim())]
        } else {
            file.feeds
        };

        let verify_tls = env_bool(&var, "RSS_VERIFY_SSL")
            .or(file.verify_tls)
            .unwrap_or(true);

        let entry_limit = match var("ENTRY_LIMIT") {
            Some(raw) => parse_number("ENTRY_LIMIT", &raw)?,
            None => file.entry_limit.unwrap_or(DEFAULT_ENTRY_LIMIT),
        };

        let frequency = match var("DIGEST_FREQUENCY") {
            Some(raw) => raw.parse::<Frequency>().map_err(|reason| ConfigError::Invalid {
                key: "DIGEST_FREQUENCY",
                reason,
            })?,
            None => file.frequency.unwrap_or_default(),
        };

        let send_empty = env_bool(&var, "SEND_EMPTY_DIGEST")
            .or(file.send_empty)
            .unwrap_or(true);

        let smtp = SmtpSettings {
            host: var("SMTP_HOST")
                .or(file.smtp.host)
                .map(|h| h.trim().to_string())
                .unwrap_or_default(),
            port: match var("SMTP_PORT") {
                Some(raw) => parse_number("SMTP_PORT", &raw)?,
                None => file.smtp.port.unwrap_or(DEFAULT_SMTP_PORT),
            },
            username: var("SMTP_USERNAME").or(file.smtp.username),
            password: var("SMTP_PASSWORD")
                .or(file.smtp.password)
                .map(SecretString::from),
            starttls: env_bool(&var, "SMTP_STARTTLS")
                .or(file.smtp.starttls)
                .unwrap_or(true),
            ssl: env_bool(&var, "SMTP_SSL").or(file.smtp.ssl).unwrap_or(false),
        };

        let to = match var("EMAIL_TO") {
            Some(raw) => split_addresses(&raw),
            None => file
                .email
                .to
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        };

        let email = EmailSettings {
            from: var("EMAIL_FROM")
                .or(file.email.from)
                .map(|f| f.trim().to_string())
                .unwrap_or_default(),
            from_name: var("EMAIL_FROM_NAME").or(file.email.from_name),
            to,
            subject: var("EMAIL_SUBJECT")
                .or(file.email.subject)
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        };

        let html = HtmlSettings {
            enabled: env_bool(&var, "HTML_ENABLED")
                .or(file.html.enabled)
                .unwrap_or(true),
            template: var("HTML_TEMPLATE").map(PathBuf::from).or(file.html.template),
        };

        let settings = Settings {
            feeds,
            verify_tls,
            entry_limit,
            frequency,
            send_empty,
            smtp,
            email,
            html,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Missing("RSS_FEEDS / RSS_FEED_URL (feeds)"));
        }
        for feed in &self.feeds {
            if feed.name.trim().is_empty() || feed.url.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "feeds",
                    reason: format!("empty name or url in '{}|{}'", feed.name, feed.url),
                });
            }
        }
        if self.smtp.host.is_empty() {
            return Err(ConfigError::Missing("SMTP_HOST (smtp.host)"));
        }
        if self.email.from.is_empty() {
            return Err(ConfigError::Missing("EMAIL_FROM (email.from)"));
        }
        if self.email.to.is_empty() {
            return Err(ConfigError::Missing("EMAIL_TO (email.to)"));
        }
        if self.entry_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "ENTRY_LIMIT",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.smtp.ssl && self.smtp.starttls {
            tracing::debug!("Both SMTP_SSL and SMTP_STARTTLS set, using implicit TLS");
        }
        if self.smtp.password.is_some() && self.smtp.username.is_none() {
            tracing::warn!("SMTP password set without a username, authentication will be skipped");
        }

        Ok(())
    }
}

/// Parses `name|url` items separated by commas or newlines.
pub fn parse_feed_list(raw: &str) -> Result<Vec<FeedSource>, ConfigError> {
    let mut feeds = Vec::new();

    for item in raw.split([',', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
        let (name, url) = item.split_once('|').ok_or_else(|| ConfigError::Invalid {
            key: "RSS_FEEDS",
            reason: format!("expected name|url, got '{}'", item),
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::Invalid {
                key: "RSS_FEEDS",
                reason: format!("empty name or url in '{}'", item),
            });
        }
        feeds.push(FeedSource::new(name, url));
    }

    if feeds.is_empty() {
        return Err(ConfigError::Invalid {
            key: "RSS_FEEDS",
            reason: "set but contains no feeds".to_string(),
        });
    }
    Ok(feeds)
}

/// `1`, `true`, `yes` and `on` (any case) are true; everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_bool<F>(var: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    var(key).map(|v| parse_bool(&v))
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{}': {}", raw.trim(), e),
    })
}

fn split_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
