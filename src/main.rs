//! # Channel Streamer - Command Line Entry Point
//!
//! Streams one or more Ogg Opus files to a push-to-talk channel, one
//! session per file, in the order given on the command line.
//!
//! ## Usage:
//! ```text
//! AUTH_TOKEN=... channel-streamer greeting.opus announcement.opus
//! ```
//!
//! ## Application Flow:
//! 1. **Load configuration** from `.env`, config.toml and environment variables
//! 2. **Set up logging** filtered by `RUST_LOG`
//! 3. **Install signal handlers** that cancel the running session
//! 4. **Stream each file** and log the outcome
//! 5. **Exit non-zero** if any session failed

use anyhow::{Context, Result};
use channel_streamer::audio::OggOpusSource;
use channel_streamer::config::AppConfig;
use channel_streamer::session::{SessionOutcome, StreamSession};
use channel_streamer::transport::WsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        anyhow::bail!("Usage: channel-streamer <file.opus>...");
    }

    info!("Starting channel-streamer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Streaming {} file(s) to channel '{}' via {}",
        files.len(),
        config.account.channel,
        config.connection.endpoint
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone())?;

    let mut failures = 0usize;
    for path in &files {
        if shutdown.is_cancelled() {
            warn!("Shutdown requested, skipping remaining files");
            break;
        }

        let source = match OggOpusSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                error!(file = %path, error = %e, "Cannot read audio file");
                failures += 1;
                continue;
            }
        };

        let session = StreamSession::new(
            WsConnector::new(config.connection.endpoint.clone()),
            config.session_settings()?,
        )
        .with_cancellation(shutdown.child_token());

        info!(file = %path, session = %session.id(), "Streaming file");
        let report = session.run(source).await;

        match report.outcome {
            SessionOutcome::Closed(summary) => info!(
                file = %path,
                packets = summary.packets_sent,
                streamed_ms = summary.streamed.as_millis() as u64,
                "File streamed"
            ),
            SessionOutcome::Cancelled => warn!(file = %path, "Streaming cancelled"),
            SessionOutcome::Failed(e) => {
                error!(file = %path, error = %e, "Streaming failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} file(s) failed to stream", failures, files.len());
    }

    info!("Done");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "channel_streamer=trace")
/// - If not set, defaults to "channel_streamer=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "channel_streamer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Cancel `shutdown` on SIGTERM or SIGINT (Ctrl+C).
///
/// The running session notices the cancellation at its next wait, sends
/// stop-stream if a stream is open, and closes its connection.
fn setup_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        shutdown.cancel();
    });

    Ok(())
}
