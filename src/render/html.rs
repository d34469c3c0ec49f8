use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

use crate::digest::{entry_count, FeedDigest};

const TEMPLATE_NAME: &str = "email";
const BUILTIN_TEMPLATE: &str = include_str!("../../templates/email.html");

#[derive(Serialize)]
struct EmailContext<'a> {
    window_label: &'a str,
    has_entries: bool,
    feeds: Vec<FeedContext<'a>>,
}

#[derive(Serialize)]
struct FeedContext<'a> {
    name: &'a str,
    url: &'a str,
    entries: Vec<EntryContext<'a>>,
}

#[derive(Serialize)]
struct EntryContext<'a> {
    title: &'a str,
    link: &'a str,
    published: Option<&'a str>,
    summary: Option<&'a str>,
}

impl<'a> EmailContext<'a> {
    fn new(digests: &'a [FeedDigest], window_label: &'a str) -> Self {
        let feeds = digests
            .iter()
            .map(|digest| FeedContext {
                name: &digest.source.name,
                url: &digest.source.url,
                entries: digest
                    .entries
                    .iter()
                    .map(|entry| EntryContext {
                        title: &entry.title,
                        link: &entry.link,
                        published: entry.published_display.as_deref(),
                        summary: entry.summary.as_deref(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            window_label,
            has_entries: entry_count(digests) > 0,
            feeds,
        }
    }
}

/// Optional HTML body renderer backed by a handlebars template.
///
/// A renderer without a usable template yields no HTML; the digest then goes
/// out as plain text only.
pub struct HtmlRenderer {
    registry: Option<Handlebars<'static>>,
}

impl HtmlRenderer {
    /// Picks the template source from configuration.
    pub fn load(enabled: bool, template: Option<&Path>) -> Self {
        match (enabled, template) {
            (false, _) => Self::disabled(),
            (true, Some(path)) => Self::from_file(path),
            (true, None) => Self::builtin(),
        }
    }

    /// Renderer using the template compiled into the binary.
    pub fn builtin() -> Self {
        Self::from_source(BUILTIN_TEMPLATE, "built-in")
    }

    /// Renderer using a template file. A missing or unreadable file disables HTML.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_source(&source, &path.display().to_string()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "HTML template unavailable, sending text only"
                );
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { registry: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }

    fn from_source(source: &str, origin: &str) -> Self {
        let mut registry = Handlebars::new();
        match registry.register_template_string(TEMPLATE_NAME, source) {
            Ok(()) => Self {
                registry: Some(registry),
            },
            Err(e) => {
                tracing::warn!(
                    template = %origin,
                    error = %e,
                    "HTML template failed to compile, sending text only"
                );
                Self::disabled()
            }
        }
    }

    /// Renders the HTML body, or `None` when no template is available or
    /// rendering fails.
    pub fn render(&self, digests: &[FeedDigest], window_label: &str) -> Option<String> {
        let registry = self.registry.as_ref()?;
        let context = EmailContext::new(digests, window_label);

        match registry.render(TEMPLATE_NAME, &context) {
            Ok(html) => Some(html),
            Err(e) => {
                tracing::warn!(error = %e, "HTML rendering failed, sending text only");
                None
            }
        }
    }
}
