//! relay-send - Background daemon for scheduled campaign content
//!
//! Polls the content store and delivers due items to the destination,
//! re-arming failures with exponential backoff.

use anyhow::Context;
use clap::Parser;
use librelaycast::config::{resolve_db_path, Config};
use librelaycast::credentials::SealedSecretResolver;
use librelaycast::destination::HttpSender;
use librelaycast::error::ConfigError;
use librelaycast::logging::LoggingConfig;
use librelaycast::periodic::PeriodicTask;
use librelaycast::scheduler::{Scheduler, TickOutcome};
use librelaycast::{Database, RelaycastError};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

/// How long a shutdown waits for an in-flight tick
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "relay-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled campaign content")]
#[command(long_about = "\
relay-send - Background daemon for scheduled campaign content

DESCRIPTION:
    relay-send is a long-running daemon that polls the Relaycast database
    for content items that are due and delivers them to the destination.

    Failed deliveries are retried with exponential backoff (1m base,
    doubling per attempt) until the retry limit is reached. Items of
    paused campaigns are left untouched.

USAGE:
    # Run in foreground (logs to stderr)
    relay-send

    # Poll every 30 seconds
    relay-send --poll-interval 30s

    # Process due content once and exit
    relay-send --once

    # Seal a destination token for storage
    echo -n \"$BOT_TOKEN\" | relay-send --seal

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (waits for the current tick)

CONFIGURATION:
    Configuration file: ~/.config/relaycast/config.toml
    Database location: ~/.local/share/relaycast/relaycast.db

    [scheduler]
    poll_interval = \"60s\"
    max_retries = 3
    base_delay = \"1m\"

    [destination]
    endpoint = \"https://chat.example.org/api/messages\"

ENVIRONMENT:
    RELAYCAST_CONFIG      Path to the configuration file
    RELAYCAST_DB_PATH     Database path override
    RELAYCAST_SECRET_KEY  Master key for sealed credentials

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Poll interval (overrides config), e.g. "30s" or "2m"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Process due content once and exit
    #[arg(long)]
    once: bool,

    /// Read a destination token from stdin and print its sealed form
    #[arg(long, conflicts_with = "once")]
    seal: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<RelaycastError>()
        .map_or(1, RelaycastError::exit_code)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default()?;
    let resolver = SealedSecretResolver::from_env(&config.credentials.secret_key_env)
        .map_err(RelaycastError::from)?;

    if cli.seal {
        return seal_stdin(&resolver);
    }

    let endpoint = config
        .destination
        .endpoint
        .as_deref()
        .ok_or_else(|| {
            RelaycastError::from(ConfigError::MissingField("destination.endpoint".to_string()))
        })?;
    let sender = HttpSender::new(endpoint, config.destination.timeout)?;

    let db_path = resolve_db_path(Some(&config.database.path))?;
    let db = Database::new(&db_path.to_string_lossy()).await?;

    let scheduler = Arc::new(Scheduler::from_config(
        Arc::new(db),
        Arc::new(resolver),
        Arc::new(sender),
        &config.scheduler,
    ));

    info!(
        endpoint = %endpoint,
        database = %db_path.display(),
        "relay-send starting"
    );

    if cli.once {
        log_outcome(scheduler.tick().await);
        info!("relay-send: processed due content once, exiting");
        return Ok(());
    }

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduler.poll_interval);
    info!(poll_interval = ?poll_interval, "entering daemon loop");

    let shutdown = Arc::new(Notify::new());
    setup_signal_handlers(shutdown.clone())?;

    let task = PeriodicTask::start(scheduler.clone(), poll_interval)?;
    // Catch up right away instead of waiting a full period
    log_outcome(scheduler.tick().await);

    shutdown.notified().await;
    info!("shutdown requested, waiting for in-flight tick");
    if !task.shutdown(SHUTDOWN_GRACE).await {
        info!(grace = ?SHUTDOWN_GRACE, "in-flight tick did not finish in time");
    }

    info!("relay-send stopped");
    Ok(())
}

fn log_outcome(outcome: TickOutcome) {
    match outcome {
        TickOutcome::Completed(report) if report.processed() > 0 => info!(
            posted = report.posted,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "tick finished"
        ),
        TickOutcome::Completed(_) => info!("no content due"),
        TickOutcome::Skipped => info!("tick skipped, previous tick still running"),
    }
}

fn seal_stdin(resolver: &SealedSecretResolver) -> anyhow::Result<()> {
    let mut token = String::new();
    std::io::stdin()
        .read_to_string(&mut token)
        .context("failed to read token from stdin")?;

    let token = token.trim();
    if token.is_empty() {
        return Err(RelaycastError::InvalidInput("no token on stdin".to_string()).into());
    }

    let sealed = resolver.seal(token).map_err(RelaycastError::from)?;
    println!("{}", sealed);
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<Notify>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| RelaycastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "received shutdown signal");
            shutdown.notify_one();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<Notify>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C");
            shutdown.notify_one();
        }
    });
    Ok(())
}
