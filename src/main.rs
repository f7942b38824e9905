use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use topicd::api::{self, AppState};
use topicd::broker::Broker;
use topicd::config::Config;
use topicd::shutdown::ShutdownCoordinator;

#[derive(Error, Debug)]
pub enum TopicdError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), TopicdError> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "topicd=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let broker = Broker::new(config.sink());
    let shutdown = ShutdownCoordinator::new();
    let state = AppState {
        broker,
        shutdown: shutdown.clone(),
        announce: config.announce,
        max_body_bytes: config.max_body_bytes,
    };

    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| TopicdError::Bind {
            addr: config.bind.clone(),
            source,
        })?;
    tracing::info!(
        addr = %config.bind,
        capacity = config.capacity,
        overflow = ?config.overflow,
        "topicd listening"
    );

    let coordinator = shutdown.clone();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested, closing subscriber streams");
            coordinator.shutdown();
        })
        .await?;

    if tokio::time::timeout(config.shutdown_grace(), shutdown.wait_for_all_closed())
        .await
        .is_err()
    {
        tracing::warn!(open = shutdown.active_count(), "streams still open after grace period");
    }

    tracing::info!("topicd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
