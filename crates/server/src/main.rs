use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::{
    create_authenticator, load_config, validate_config, Authenticator, Config, RelayEvent,
    RelayOptions, RelayServer,
};
use relay_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("relay.toml"));

    // Load configuration before logging so the configured level applies
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config);
    info!("Starting relay v{}", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Config hash: {}", &config_hash[..16]);
    info!("Auth method: {:?}", config.auth.method);
    info!("ffmpeg path: {:?}", config.transcoder.ffmpeg_path);
    match config.limits.max_concurrent_transcodes {
        Some(limit) => info!("Concurrent transcode limit: {}", limit),
        None => info!("No concurrent transcode limit"),
    }

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Create relay
    let options = RelayOptions::from_config(&config).context("Invalid relay options")?;
    let relay = RelayServer::new(options);
    let event_logger = tokio::spawn(log_relay_events(relay.clone()));

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), authenticator, relay.clone()));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(relay.clone()))
    .await
    .context("Server error")?;

    // Every transcoder must be gone before the process exits.
    relay.shutdown().await;
    event_logger.abort();
    info!("Server stopped");

    Ok(())
}

fn init_logging(config: &Config) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{},tower_http=debug", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Operator-side view of every connection's lifecycle.
async fn log_relay_events(relay: RelayServer) {
    let mut events = relay.subscribe();
    loop {
        match events.recv().await {
            Ok(RelayEvent::Connection { id, remote_address }) => {
                info!(connection = %id, remote = ?remote_address, "client connected");
            }
            Ok(RelayEvent::Error { id, error }) => match error.details() {
                Some(details) => {
                    error!(connection = %id, kind = error.name(), details = %details, "{}", error)
                }
                None => error!(connection = %id, kind = error.name(), "{}", error),
            },
            Ok(RelayEvent::FfmpegOutput { id, line }) => {
                debug!(connection = %id, "ffmpeg: {}", line);
            }
            Ok(RelayEvent::Destroyed { id }) => {
                info!(connection = %id, "transcoder destroyed");
            }
            Ok(RelayEvent::Disconnected { id }) => {
                info!(connection = %id, "client disconnected");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Operator event log lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then close every client
/// channel so upgraded sockets let the server finish.
async fn shutdown_signal(relay: RelayServer) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    tokio::spawn(async move { relay.shutdown().await });
}
