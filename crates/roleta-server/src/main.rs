//! Roleta-server: real-time roulette advisory WebSocket service.
//!
//! Usage:
//!   roleta-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>   Config file path (default: config/server.toml)
//!   --host <HOST>         Bind host (overrides config)
//!   -p, --port <PORT>     Bind port (overrides config)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use roleta_server::config::ServerConfig;
use roleta_server::repo::{DecisionRepository, SqliteDecisionLog};
use roleta_server::server::{ConnectionManager, MessageHandler, RoletaServer};
use roleta_server::state::GameState;

#[derive(Parser, Debug)]
#[command(name = "roleta-server")]
#[command(about = "Real-time roulette advisory WebSocket service")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Bind host (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        ServerConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.host, args.port);
    config.validate().context("Configuration validation failed")?;

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("Starting roleta-server");

    let repo: Arc<dyn DecisionRepository> = Arc::new(
        SqliteDecisionLog::connect(&config.storage.database_path)
            .await
            .context("Failed to open decision log database")?,
    );

    let session_id = Uuid::new_v4().to_string();
    repo.create_session(&session_id)
        .await
        .context("Failed to create session")?;
    info!(session = %session_id, "Session started");

    let state_path = PathBuf::from(&config.storage.state_path);
    let game = GameState::load_or_default(&state_path);
    info!(
        cw_forces = game.timeline(roleta_core::Direction::Clockwise).len(),
        ccw_forces = game.timeline(roleta_core::Direction::Counterclockwise).len(),
        "Game state loaded"
    );

    let connections = Arc::new(ConnectionManager::new(Duration::from_secs(
        config.master_grace_secs,
    )));

    let handler = Arc::new(MessageHandler::new(
        game,
        repo.clone(),
        connections.clone(),
        session_id.clone(),
        state_path,
        Duration::from_millis(config.persist_timeout_ms),
    ));
    handler.restore_tracker().await;

    let server = RoletaServer::new(config, handler.clone(), connections);
    let shutdown = server.shutdown_handle();

    let server_handle = {
        let server = Arc::new(server);
        let server_for_task = Arc::clone(&server);
        tokio::spawn(async move { server_for_task.run().await })
    };

    if let Err(e) = wait_for_shutdown().await {
        warn!(error = %e, "Shutdown signal handler failed");
    }

    let _ = shutdown.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Server exited with error"),
        Err(e) => warn!(error = %e, "Server task panicked"),
    }

    if let Err(e) = handler.flush_state().await {
        warn!(error = %e, "Failed to persist final state snapshot");
    }
    let session = handler.current_session();
    if let Err(e) = repo.end_session(&session).await {
        warn!(session = %session, error = %e, "Failed to close session");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
