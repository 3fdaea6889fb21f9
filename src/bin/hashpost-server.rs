//! Hashpost upload server
//!
//! Accepts multipart uploads on `POST /upload`, hashes each file as it
//! streams in and rejects anything whose declared SHA-256 does not match.

use anyhow::Context;
use tokio::signal;

use hashpost::config::ServerConfig;
use hashpost::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = ServerConfig::from_env().context("load server config")?;

    tracing::info!("Starting Hashpost Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        read_timeout = %humantime::format_duration(config.read_timeout),
        write_timeout = %humantime::format_duration(config.write_timeout),
        idle_timeout = %humantime::format_duration(config.idle_timeout),
        diagnostics = config.diagnostics_enabled,
        "Server configured"
    );

    server::serve(config, shutdown_signal())
        .await
        .context("run upload server")?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
