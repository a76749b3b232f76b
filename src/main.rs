use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use telson::channels::{build_telegram_config, TelegramSender, TelegramUpdateSource};
use telson::commands::Dispatcher;
use telson::completion::{build_completion_config, HttpCompletionBackend};
use telson::config;
use telson::logging;
use telson::poller::{build_poll_config, poll_loop, Poller};
use telson::server::{build_http_config, run_server_with_config, ServerConfig};
use telson::sessions::{ArchiveManager, SessionStore};
use telson::storage::{FsBlobStore, OffsetStore};

#[derive(Parser)]
#[command(name = "telson", version, about = "Telegram session bot with offset-tracked polling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and, unless disabled, the interval poll loop
    Serve,
    /// Run one poll cycle and print the cycle report
    Poll,
    /// Print config path, state directory, cursor and store counts
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand and explicit `serve` both launch the server.
        None | Some(Command::Serve) => run_serve().await,
        Some(Command::Poll) => run_poll_once().await,
        Some(Command::Status) => run_status(),
    }
}

/// The wired application: stores, adapters and the dispatcher.
struct App {
    offsets: Arc<OffsetStore>,
    dispatcher: Arc<Dispatcher>,
    source: Arc<TelegramUpdateSource>,
}

/// Build every store and adapter from the loaded configuration.
fn build_app(cfg: &Value) -> Result<App, Box<dyn std::error::Error>> {
    let state_dir = config::resolve_state_dir();
    std::fs::create_dir_all(&state_dir)?;

    let telegram_config = build_telegram_config(cfg);
    if telegram_config.bot_token.is_empty() {
        warn!(target: "config", "no bot token configured (set TELSON_BOT_TOKEN or telegram.botToken)");
    }
    let completion_config = build_completion_config(cfg);

    let offsets = Arc::new(OffsetStore::new(state_dir.clone()));
    let sessions = Arc::new(SessionStore::new(state_dir.clone()));
    let blobs = Arc::new(FsBlobStore::new(state_dir));
    let archives = Arc::new(ArchiveManager::new(sessions.clone(), blobs));

    let sender = Arc::new(TelegramSender::new(&telegram_config));
    let completion = Arc::new(HttpCompletionBackend::new(&completion_config));
    let source = Arc::new(TelegramUpdateSource::new(&telegram_config));

    let dispatcher = Arc::new(Dispatcher::new(
        sessions,
        archives,
        sender,
        completion,
        completion_config.model,
    ));

    Ok(App {
        offsets,
        dispatcher,
        source,
    })
}

fn init_logging_and_config() -> Result<Value, Box<dyn std::error::Error>> {
    let cfg = config::load_config().unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}, using defaults", e);
        Value::Object(serde_json::Map::new())
    });
    logging::init_logging(logging::build_log_config(&cfg))?;
    Ok(cfg)
}

/// Run the webhook server plus the interval poll loop.
async fn run_serve() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = init_logging_and_config()?;
    let app = build_app(&cfg)?;

    let http_config = build_http_config(&cfg);
    let poll_config = build_poll_config(&cfg);

    info!(
        target: "server",
        version = env!("CARGO_PKG_VERSION"),
        state_dir = %config::resolve_state_dir().display(),
        "telson starting"
    );

    let bind_address: SocketAddr = format!("{}:{}", http_config.host, http_config.port).parse()?;
    let server_config = ServerConfig {
        handler: app.dispatcher.clone(),
        http_config,
        bind_address,
    };
    let handle = run_server_with_config(server_config).await?;

    if poll_config.enabled {
        let poller = Arc::new(Poller::new(
            app.offsets.clone(),
            app.source.clone(),
            app.dispatcher.clone(),
        ));
        let shutdown_rx = handle.shutdown_sender().subscribe();
        tokio::spawn(poll_loop(
            poller,
            Duration::from_secs(poll_config.interval_secs),
            shutdown_rx,
        ));
        info!(target: "poller", interval_secs = poll_config.interval_secs, "poll loop started");
    } else {
        info!(target: "poller", "poll loop disabled by configuration");
    }

    let reason = await_shutdown_trigger().await;
    info!(target: "server", "shutdown signal received ({})", reason);
    handle.shutdown().await;
    info!(target: "server", "telson shut down");
    Ok(())
}

/// Run a single poll cycle and print the report.
async fn run_poll_once() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = init_logging_and_config()?;
    let app = build_app(&cfg)?;

    let poller = Poller::new(app.offsets, app.source, app.dispatcher);
    let report = poller.run_cycle().await?;

    println!(
        "mode: {:?}\nfetched: {}\ndispatched: {}\nskipped: {}\ncommitted: {}",
        report.mode,
        report.fetched,
        report.dispatched,
        report.skipped,
        report
            .committed
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(())
}

/// Print configuration and store state without touching the network.
fn run_status() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config().unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
    let state_dir = config::resolve_state_dir();

    let offsets = OffsetStore::new(state_dir.clone());
    let sessions = SessionStore::new(state_dir.clone());
    let cursor = offsets.load();

    println!("config path: {}", config::get_config_path().display());
    println!("state dir: {}", state_dir.display());
    println!(
        "cursor: {} (version {})",
        cursor.value, cursor.version
    );
    println!("sessions: {}", sessions.count_sessions());
    println!("archives: {}", count_archive_blobs(&state_dir));

    let poll_config = build_poll_config(&cfg);
    println!(
        "polling: {} (every {}s)",
        if poll_config.enabled { "enabled" } else { "disabled" },
        poll_config.interval_secs
    );
    Ok(())
}

/// Count archive blobs across all users in the state directory.
fn count_archive_blobs(state_dir: &std::path::Path) -> usize {
    let Ok(users) = std::fs::read_dir(state_dir.join("archives")) else {
        return 0;
    };
    users
        .flatten()
        .filter_map(|u| std::fs::read_dir(u.path()).ok())
        .flat_map(|dir| dir.flatten())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .count()
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    panic!("Failed to install Ctrl+C handler: {}", e);
                }
            }
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            panic!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
