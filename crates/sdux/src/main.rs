//! # sdux
//!
//! Session runtime for the SDUX desktop shell.
//!
//! ## Overview
//!
//! One `sdux` process runs per login session. It:
//! - tracks top-level windows on the X11 display
//! - launches and supervises applications from the launcher registry
//! - serves the session bus (`org.sdux.Session1`) on a Unix socket
//! - ends the session on logout, SIGTERM or SIGINT
//!
//! ## Architecture
//!
//! This is Layer 3 - the binary that ties together:
//! - sdux-core: Core types and configuration
//! - sdux-supervisor: Launcher registry and process supervision
//! - sdux-windows: Window tracking and the X11 source
//! - sdux-session: Session state and the event dispatcher
//!
//! ## Exit status
//!
//! `0` after a normal logout, `1` when startup fails, `2` after a fatal
//! session error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use sdux::BusServer;
use sdux_core::{DisplayServer, LoggingSettings, Session, SessionId, ShellConfig};
use sdux_session::{
    Dispatcher, DispatcherConfig, HelperAuthenticator, SessionHandle, SessionOutcome, SessionState,
};
use sdux_supervisor::{LauncherRegistry, OsProcessBackend, Supervisor, SupervisorConfig};
use sdux_windows::{WindowEventSource, X11Source};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// SDUX session runtime.
#[derive(Debug, Parser)]
#[command(name = "sdux", author, version, about)]
struct Cli {
    /// Session identifier (generated when omitted)
    #[arg(long, value_name = "UUID", env = "SDUX_SESSION_ID")]
    session_id: Option<Uuid>,

    /// Disable every automatic restart
    #[arg(long)]
    safe_mode: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/sdux/config.yaml)
    #[arg(long, value_name = "PATH", env = "SDUX_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Session bus socket path
    #[arg(long, value_name = "PATH")]
    bus_socket: Option<PathBuf>,

    /// X11 display to manage (default: DISPLAY)
    #[arg(long, value_name = "NAME")]
    display: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(SessionOutcome::LoggedOut) => {
            tracing::info!("Session ended");
            ExitCode::SUCCESS
        }
        Ok(SessionOutcome::Fatal(reason)) => {
            tracing::error!("Session ended with a fatal error: {}", reason);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("Startup failed: {:#}", e);
            eprintln!("sdux: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<SessionOutcome> {
    let config_path = cli.config.clone().or_else(ShellConfig::default_path);
    let mut config = match &config_path {
        Some(path) => ShellConfig::load_or_default(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ShellConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&config.logging)?;

    let session_id = cli.session_id.map(SessionId::from).unwrap_or_default();
    tracing::info!(
        "SDUX session {} starting (version {}, safe mode: {})",
        session_id,
        env!("CARGO_PKG_VERSION"),
        config.supervisor.safe_mode
    );
    match &config_path {
        Some(path) => tracing::debug!("Configuration path {}", path.display()),
        None => tracing::debug!("No configuration path, using defaults"),
    }

    let display_server = DisplayServer::detect(config.windowing.display.as_deref());
    tracing::info!("Display server: {}", display_server);
    let Some(x11_display) = display_server.x11_display() else {
        bail!(
            "{} is not supported, an X11 display is required",
            display_server.name()
        );
    };
    let source = X11Source::connect(Some(x11_display))
        .with_context(|| format!("connecting to X11 display {x11_display}"))?;

    let registry = LauncherRegistry::from_config(&config);
    tracing::info!("Launcher registry holds {} applications", registry.len());
    let supervisor = Supervisor::new(SupervisorConfig::from(&config));
    let state = SessionState::new(Session::new(session_id), registry, supervisor);
    let backend = Arc::new(OsProcessBackend::new(
        session_id,
        config.supervisor.spawn_workers,
    ));

    let (dispatcher, handle, window_tx) =
        Dispatcher::new(state, backend, DispatcherConfig::from(&config));

    let source_name = source.name();
    Box::new(source).start(window_tx);
    tracing::info!("Window source '{}' started", source_name);

    let bus = BusServer::new(
        handle.clone(),
        Arc::new(HelperAuthenticator::from_settings(&config.auth)),
        config_path,
        Duration::from_millis(config.bus.request_timeout_ms),
    );
    tokio::spawn(bus.run(config.bus.clone()));
    tokio::spawn(logout_on_signal(handle));

    Ok(dispatcher.run().await)
}

fn apply_overrides(config: &mut ShellConfig, cli: &Cli) {
    if cli.safe_mode {
        config.supervisor.safe_mode = true;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        config.logging.file = Some(file.clone());
    }
    if let Some(socket) = &cli.bus_socket {
        config.bus.socket_path = Some(socket.clone());
    }
    if let Some(display) = &cli.display {
        config.windowing.display = Some(display.clone());
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. With a log file, lines go
/// through a non-blocking writer whose guard must outlive the session.
fn init_logging(settings: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Turn SIGTERM and SIGINT into a graceful logout.
async fn logout_on_signal(handle: SessionHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Could not install signal handlers: {}", e);
            return;
        }
    };

    loop {
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = handle.closed() => return,
        };
        tracing::info!("{} received, logging out", name);
        if handle.logout(false).await.is_err() {
            return;
        }
    }
}
