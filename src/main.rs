use std::sync::Arc;

use anyhow::Context;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use clean_newsletters::config::Config;
use clean_newsletters::llm::{NewsletterClassifier, create_provider};
use clean_newsletters::mailbox::{ImapMailbox, Mailbox};
use clean_newsletters::pipeline::{NewsletterProcessor, RunOrchestrator};
use clean_newsletters::store::SenderLedger;

/// Daily log file prefix inside the profile directory.
const LOG_FILE_PREFIX: &str = "clean_newsletters.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::from_env().context("Failed to load configuration")?;

    // Logs go to stderr and to a daily file next to the ledger
    let profile_dir = config.profile_dir();
    create_profile_dir(&profile_dir)
        .with_context(|| format!("Failed to create {}", profile_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&profile_dir, LOG_FILE_PREFIX);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("📬 Clean Newsletters v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Profile: {}", config.profile);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Mailbox: {}@{}/{}", config.imap.username, config.imap.host, config.imap.mailbox);
    eprintln!("   Ledger: {}", config.ledger_path.display());
    eprintln!(
        "   Seed subscriptions: {}\n",
        config.subscribed_newsletters.len()
    );

    // ── Ledger ──────────────────────────────────────────────────────────
    let ledger = Arc::new(
        SenderLedger::open(config.ledger_path.clone())
            .await
            .with_context(|| format!("Failed to open ledger at {}", config.ledger_path.display()))?,
    );

    // ── Classifier + mailbox ────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let classifier = NewsletterClassifier::new(llm, config.llm.timeout);
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(config.imap.clone()));

    let processor = NewsletterProcessor::new(
        Arc::clone(&ledger),
        classifier,
        Arc::clone(&mailbox),
        config.subscribed_newsletters.clone(),
    );

    // ── Run ─────────────────────────────────────────────────────────────
    let run_id = uuid::Uuid::new_v4();
    let result = RunOrchestrator::new(&processor, mailbox.as_ref(), &ledger)
        .with_max_concurrency(config.max_concurrency)
        .run()
        .instrument(info_span!("run", id = %run_id, profile = %config.profile))
        .await;

    // Teardown happens even when the run failed
    if let Err(e) = ledger.flush().await {
        warn!(error = %e, "Failed to flush ledger");
    }
    if let Err(e) = mailbox.close().await {
        warn!(error = %e, "Failed to close mailbox");
    }

    let report = result.context("Run aborted")?;
    eprintln!("\n{}", report.summary());
    info!(run = %run_id, "Done");
    Ok(())
}

/// Create the profile directory readable only by the owner.
fn create_profile_dir(path: &std::path::Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
