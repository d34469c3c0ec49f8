//! Digest bodies: plain text always, HTML when a template is available.

mod html;
mod text;

pub use html::HtmlRenderer;
pub use text::{render_text, EMPTY_FEED_PLACEHOLDER, NO_ENTRIES_MESSAGE};
