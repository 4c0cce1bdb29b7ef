use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transcribe_relay::{create_router, AppState, Config, DeepgramConnector};

/// Force exit if connections have not drained by then
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "transcribe-relay", about = "Relay browser audio to a streaming speech-to-text provider")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/transcribe-relay")]
    config: String,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = Config::load(&args.config).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.service.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = cfg.validate() {
        if cfg.is_production() {
            return Err(e).context("Provider credentials are required in production");
        }
        warn!("{} (development mode, transcription sessions will fail until configured)", e);
    }

    let connector = Arc::new(DeepgramConnector::from_config(&cfg.provider));
    let state = AppState::new(connector, cfg.relay_settings());
    let app = create_router(state.clone());

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "{} started on {} (env={:?}, pid={})",
        cfg.service.name,
        addr,
        cfg.service.environment,
        std::process::id()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Received shutdown signal, closing server...");
            state.close_all();

            tokio::spawn(async {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                error!("Could not close connections in time, forcefully shutting down");
                std::process::exit(1);
            });
        })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server closed. Exiting process.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
}
