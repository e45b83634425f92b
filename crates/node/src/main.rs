//! Node entry point.

use node::config::Config;
use node::error::NodeError;
use node::{Node, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    // 1. Configuration and observability
    let config = Config::from_env()?;
    telemetry::init_tracing(&config)?;
    let metrics_handle = telemetry::install_metrics()?;

    // 2. Backends, consumer groups and background tasks
    let node = Node::start(&config).await?;

    // 3. HTTP surface until a shutdown signal arrives
    let app = node::create_app(node.state(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Let workers finish their in-flight entries
    node.shutdown().await;
    tracing::info!("node shut down gracefully");
    Ok(())
}
