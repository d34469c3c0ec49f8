//! Fetches RSS/Atom feeds, keeps the entries from a trailing time window, and
//! mails them as a plain-text (and optionally HTML) digest.
//!
//! One run is one pass: [`runner::run`] fetches every feed in turn, renders the
//! digest, and performs a single SMTP transaction.

pub mod config;
pub mod digest;
pub mod feed;
pub mod mail;
pub mod render;
pub mod runner;
