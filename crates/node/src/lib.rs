//! Service node of the commerce platform.
//!
//! A node runs the consumer workers of one service (or all six), the
//! delivery outbox relay and the expired-payment sweeper, and serves a small
//! HTTP surface: health, Prometheus metrics, dead-letter inspection and the
//! entry points of the purchase saga.

pub mod backends;
pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod telemetry;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::ServiceName;
use futures_util::future::join_all;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use backends::{Bus, SharedLog, Stores};
use config::Config;
use error::Result;
use services::Services;
use workers::{Launcher, Task};

/// Shared state accessible from all handlers.
pub struct AppState {
    pub bus: SharedLog,
    pub services: Services,
    /// Services whose background tasks run on this node.
    pub running: Vec<ServiceName>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::scrape))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/dlq/{stream}", get(routes::dlq::list))
        .route("/products", post(routes::products::create))
        .route("/products/{id}", get(routes::products::get))
        .route("/carts/{user_id}", get(routes::carts::items))
        .route("/carts/{user_id}/items", put(routes::carts::put_item))
        .route("/orders", post(routes::orders::place))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/delivery", get(routes::orders::delivery))
        .route("/payments/notifications", post(routes::payments::notify))
        .route("/payments/{order_id}", get(routes::payments::get))
        .route(
            "/deliveries/{id}/status",
            put(routes::deliveries::update_status),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// A started node: its services and the background tasks running them.
pub struct Node {
    state: Arc<AppState>,
    tasks: Vec<Task>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    /// Connects the configured backends and starts the node.
    pub async fn start(config: &Config) -> Result<Self> {
        let bus = Bus::connect(config).await?;
        let stores = Stores::open(config).await?;
        Self::start_with(config, bus, stores).await
    }

    /// Starts the node on already opened backends.
    ///
    /// Consumer groups are created before any worker is spawned so that no
    /// entry appended after startup is missed.
    pub async fn start_with(config: &Config, bus: Bus, stores: Stores) -> Result<Self> {
        let services = Services::new(stores, bus.shared(), config);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let launcher = Launcher::new(&bus, config, shutdown_rx);
        launcher.ensure_groups().await?;
        let tasks = launcher.launch(&services).await?;

        let running = config.service.services();
        tracing::info!(
            services = ?running.iter().map(ServiceName::as_str).collect::<Vec<_>>(),
            tasks = tasks.len(),
            "node started"
        );

        let state = Arc::new(AppState {
            bus: bus.shared(),
            services,
            running,
        });
        Ok(Self {
            state,
            tasks,
            shutdown,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Signals every background task to stop and waits for them.
    ///
    /// In-flight handlers finish first; unacknowledged entries stay pending
    /// and are re-read from the backlog on the next start.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);

        let (names, handles): (Vec<String>, Vec<_>) = self
            .tasks
            .into_iter()
            .map(|task| (task.name, task.handle))
            .unzip();
        for (name, result) in names.iter().zip(join_all(handles).await) {
            if let Err(err) = result {
                tracing::error!(task = %name, error = %err, "task ended abnormally");
            }
        }
        tracing::info!("node stopped");
    }
}
