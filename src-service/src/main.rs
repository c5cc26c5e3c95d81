//! NoiseWatch Background Service
//!
//! Serves the event store API and runs the noise monitoring session. The
//! session replays an audio source, renders a scrolling spectrogram, detects
//! sustained noise and reports each detection to the store.

mod audio;
mod audio_loop;
mod config;
mod dispatcher;
mod error;
mod history;
mod processor;
mod server;
mod session;
mod store;
mod store_client;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::audio::WavSourceProvider;
use crate::config::ServiceConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::server::AppState;
use crate::session::SessionController;
use crate::store_client::HttpStoreClient;

fn main() {
    // Initialize logging with RUST_LOG env var support
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "NoiseWatch Service starting (pid: {})...",
        std::process::id()
    );

    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("Service error: {}", e);
        std::process::exit(1);
    }

    info!("NoiseWatch Service stopped");
}

async fn run(config: ServiceConfig) -> Result<()> {
    let store = store::open_store(&config.store)?;

    let client = Arc::new(HttpStoreClient::new(
        config.report_base_url(),
        Duration::from_secs(config.dispatch.request_timeout_secs),
    )?);
    info!("Reporting events to {}", client.base_url());

    let (dispatcher, worker) = EventDispatcher::spawn(client.clone(), &config.dispatch);
    let provider = Arc::new(WavSourceProvider::new(Duration::from_millis(
        config.session.tick_interval_ms,
    )));
    let session = SessionController::new(&config, provider, client, dispatcher);

    let state = AppState {
        store,
        session: Arc::clone(&session),
        source_tag: config.store.source_tag.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    info!("Cleaning up...");
    session.stop();
    worker
        .shutdown(Duration::from_millis(config.dispatch.shutdown_grace_ms))
        .await;
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM/SIGHUP on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(mut sigterm), Ok(mut sighup)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sighup.recv() => info!("Received SIGHUP"),
                }
            }
            _ => {
                error!("Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => {}
    }

    info!("Shutdown requested");
}
