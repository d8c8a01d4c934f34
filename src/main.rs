//! Transcode Relay Server
//!
//! Streams a media source to HTTP clients as fragmented MP4. Each request
//! starts its own ffmpeg process and relays its stdout to the response;
//! the process is killed and reaped as soon as either side goes away.

mod config;
mod config_file;
mod error;
mod http;
#[cfg(test)]
mod integration;
mod limits;
mod metrics;
mod relay;
mod session;
mod state;
mod transcode;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "transcode-relay";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(flag) if flag == "--init-config" => {
            let path = args.next().unwrap_or_else(|| "config.toml".to_string());
            config_file::generate_default_config(&path)
                .map_err(|e| ServerError::Config(format!("{}: {}", path, e)))?;
            println!("Wrote default configuration to {}", path);
            return Ok(());
        }
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    // Load configuration, then set up logging from it
    let loaded = config_file::load_config(&config_path);
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ServerConfig::default(),
    };
    init_logging(&config);

    if let Err(e) = &loaded {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("Configuration loaded: {:?}", config);

    // Create application state
    let state = Arc::new(AppState::new(config.clone()));
    tracing::info!("Transcoder: {}", state.launcher.program());

    // Build router
    let app = create_router(Arc::clone(&state));

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Initialize logging with tracing. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("transcode_relay={},tower_http=info", config.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on Ctrl+C or SIGTERM. Cancelling `shutdown` stops every running
/// relay so their responses end and the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested, stopping active sessions");
    shutdown.cancel();
}
