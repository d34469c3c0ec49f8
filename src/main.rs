use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use rss_digest::config::Settings;
use rss_digest::digest::Frequency;
use rss_digest::feed::Fetcher;
use rss_digest::mail::SmtpTransport;
use rss_digest::render::HtmlRenderer;
use rss_digest::runner::{self, EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Parser, Debug)]
#[command(
    name = "rss-digest",
    version,
    about = "Mail a digest of recent RSS/Atom entries"
)]
struct Args {
    /// TOML config file (optional; environment variables override it)
    #[arg(long, short, value_name = "FILE", default_value = "rss-digest.toml")]
    config: PathBuf,

    /// Override the configured digest frequency
    #[arg(long, value_name = "daily|weekly")]
    frequency: Option<Frequency>,

    /// Fetch and render, then print the text body instead of sending
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    // stdout carries the --dry-run digest
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(config = %args.config.display(), error = %e, "Configuration error");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    if let Some(frequency) = args.frequency {
        settings.frequency = frequency;
    }

    match execute(&settings, args.dry_run) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Run aborted");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Builds the runtime and collaborators, then runs a single cycle.
fn execute(settings: &Settings, dry_run: bool) -> Result<u8> {
    // Feeds are fetched one after another; a single thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let fetcher = Fetcher::new(settings.verify_tls).context("Failed to build HTTP client")?;
    let html = HtmlRenderer::load(settings.html.enabled, settings.html.template.as_deref());

    if dry_run {
        return runtime.block_on(async {
            match runner::prepare(settings, &fetcher, &html, Utc::now()).await {
                Ok(digest) => {
                    println!("{}", digest.text);
                    tracing::info!(
                        feeds = digest.feeds,
                        entries = digest.entries,
                        html = digest.html.is_some(),
                        "Dry run, nothing sent"
                    );
                    Ok(EXIT_SUCCESS)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Digest not built");
                    Ok(EXIT_FAILURE)
                }
            }
        });
    }

    let transport = SmtpTransport::new(&settings.smtp).context("Failed to configure SMTP")?;

    let result = runtime.block_on(runner::run(
        settings,
        &fetcher,
        &html,
        &transport,
        Utc::now(),
    ));
    if let Err(e) = &result {
        if !e.is_logged() {
            tracing::error!(error = %e, "Run failed");
        }
    }
    Ok(runner::exit_code(&result))
}
