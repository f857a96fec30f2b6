//! relay-route - Forward live source-channel events to destinations
//!
//! Reads normalized inbound events as newline-delimited JSON on stdin,
//! matches them against the stored routes and delivers the formatted
//! messages through the rate-limited outbound queue.

use clap::Parser;
use librelaycast::config::{resolve_db_path, Config};
use librelaycast::credentials::SealedSecretResolver;
use librelaycast::destination::HttpSender;
use librelaycast::error::ConfigError;
use librelaycast::logging::LoggingConfig;
use librelaycast::periodic::PeriodicTask;
use librelaycast::{Database, EventRouter, InboundEvent, OutboundQueue, RelaycastError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// How long a shutdown waits for an in-flight delivery
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "relay-route")]
#[command(version)]
#[command(about = "Forward live source-channel events to destinations")]
#[command(long_about = "\
relay-route - Forward live source-channel events to destinations

DESCRIPTION:
    relay-route reads normalized inbound events, one JSON object per line,
    from stdin. Each event is matched against the active routes for its
    platform and channel, filtered per route, formatted and queued.

    The queue delivers at most one message per drain interval (default 1s).
    Failed deliveries are logged and recorded on the route, never retried.

    When stdin closes, relay-route keeps draining until the queue is empty
    and then exits.

EVENT FORMAT:
    {\"platform\": \"discord\", \"sourceChannelId\": \"9001\",
     \"sourceMessageId\": \"m-1\", \"authorId\": \"42\", \"authorName\": \"alice\",
     \"timestampUtc\": \"2025-01-01T12:00:00Z\", \"text\": \"hello\",
     \"attachments\": [{\"kind\": \"image\", \"url\": \"https://...\"}]}

SIGNALS:
    SIGTERM, SIGINT - Stop reading and exit after the current delivery

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Drain interval (overrides config), e.g. "1s" or "500ms"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    drain_interval: Option<Duration>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    match run(cli).await {
        // Exit explicitly: a blocked stdin read would hold the runtime open
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
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

    let endpoint = config
        .destination
        .endpoint
        .as_deref()
        .ok_or_else(|| {
            RelaycastError::from(ConfigError::MissingField("destination.endpoint".to_string()))
        })?;
    let sender = HttpSender::new(endpoint, config.destination.timeout)?;

    let db_path = resolve_db_path(Some(&config.database.path))?;
    let db = Arc::new(Database::new(&db_path.to_string_lossy()).await?);

    let queue = Arc::new(
        OutboundQueue::new(db.clone(), Arc::new(resolver), Arc::new(sender))
            .with_max_pending(config.queue.max_pending),
    );
    let router = EventRouter::new(db, queue.clone());

    let drain_interval = cli.drain_interval.unwrap_or(config.queue.drain_interval);
    info!(
        endpoint = %endpoint,
        database = %db_path.display(),
        drain_interval = ?drain_interval,
        "relay-route starting"
    );

    let shutdown = Arc::new(Notify::new());
    setup_signal_handlers(shutdown.clone())?;

    let task = PeriodicTask::start(queue.clone(), drain_interval)?;

    let interrupted = tokio::select! {
        _ = shutdown.notified() => true,
        _ = read_events(&router) => false,
    };

    if !interrupted {
        info!("input closed, draining remaining forwards");
        tokio::select! {
            _ = shutdown.notified() => {}
            _ = wait_until_empty(&queue, drain_interval) => {}
        }
    }

    if !task.shutdown(SHUTDOWN_GRACE).await {
        warn!(grace = ?SHUTDOWN_GRACE, "in-flight delivery did not finish in time");
    }
    let dropped = queue.len().await;
    if dropped > 0 {
        warn!(dropped, "exiting with undelivered forwards");
    }

    info!("relay-route stopped");
    Ok(())
}

/// Feed every stdin line to the router until EOF
async fn read_events(router: &EventRouter) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin, stopping input");
                break;
            }
        };
        line_no += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };

        match router.handle(&event).await {
            Ok(queued) => debug!(line = line_no, queued, "event routed"),
            Err(e) => warn!(line = line_no, error = %e, "failed to route event"),
        }
    }
}

async fn wait_until_empty(queue: &OutboundQueue, poll: Duration) {
    while !queue.is_empty().await {
        tokio::time::sleep(poll).await;
    }
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
