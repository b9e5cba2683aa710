//! pdi-auth -- headless session daemon for the PDI field client.
//!
//! Loads configuration, restores (or establishes) a session, and keeps the
//! access token fresh until SIGTERM / SIGINT:
//!   - Configuration loading
//!   - Session restore from storage, or login from the environment
//!   - Periodic background refresh and the foreground token monitor
//!   - Graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use pdi_auth::scheduler::AlwaysOnline;
use pdi_auth::{AppState, Config};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("pdi-auth.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pdi-auth {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
pdi-auth {version} -- PDI session daemon

USAGE:
    pdi-auth [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: pdi-auth.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    PDI_CONFIG             Alternative to --config flag
    PDI_USERNAME           Login name when no stored session exists
    PDI_PASSWORD           Password for PDI_USERNAME
    PDI_*                  Per-setting overrides (see pdi-auth.toml)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = std::env::var("PDI_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        backend = %config.backend.base_url,
        storage = %config.storage.backend,
        "Starting pdi-auth"
    );
    for (key, var) in config.env_overrides.all() {
        tracing::debug!(setting = %key, env = %var, "Setting overridden by environment");
    }

    let state = AppState::from_config(config, Arc::new(AlwaysOnline))?;

    if !state.session.initialize().await? {
        login_from_env(&state).await?;
    }

    let follower = state.scheduler.follow_session();
    state.scheduler.start_monitoring();

    let mut status = state.session.refresher().status();
    let status_logger = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            tracing::info!(status = ?current, "Token status changed");
        }
    });

    shutdown_signal().await;

    tracing::info!("Shutting down");
    state.scheduler.shutdown();
    let _ = follower.await;
    status_logger.abort();

    Ok(())
}

/// Log in with `PDI_USERNAME` / `PDI_PASSWORD` when both are set.
async fn login_from_env(state: &AppState) -> anyhow::Result<()> {
    match (std::env::var("PDI_USERNAME"), std::env::var("PDI_PASSWORD")) {
        (Ok(username), Ok(password)) => {
            state.session.login(&username, &password).await?;
        }
        _ => {
            tracing::warn!(
                "No stored session and PDI_USERNAME/PDI_PASSWORD not set; \
                 background refresh stays idle until a login happens"
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("pdi_auth={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
