//! Admin HTTP server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::bootstrap::{Services, ShutdownManager, ShutdownState};
use crate::config::AdminConfig;
use crate::router::{Inbox, Router as EnvelopeRouter};
use crate::store::SharedStorage;
use crate::telemetry::Metrics;
use crate::timer::DurableTimer;

use super::handlers::{
    confirm_schedule_handler, create_batch_handler, get_batch_handler, get_schedule_handler,
    health_handler, live_handler, metrics_handler, pause_batch_handler, pause_schedule_handler,
    ready_handler, resume_batch_handler, resume_schedule_handler, stats_handler,
};

/// Admin server state.
pub struct AdminState {
    /// Server start time
    start_time: Instant,
    /// Is the server healthy
    healthy: AtomicBool,
    /// Is the server ready
    ready: AtomicBool,
    pub(super) storage: SharedStorage,
    pub(super) inbox: Inbox,
    pub(super) router: Arc<EnvelopeRouter>,
    pub(super) timer: Arc<dyn DurableTimer>,
    pub(super) shutdown: Arc<ShutdownManager>,
    /// Prometheus registry; falls back to the default registry when absent
    pub(super) metrics: Option<Arc<Metrics>>,
}

impl AdminState {
    pub fn new(services: &Services, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            start_time: Instant::now(),
            healthy: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            storage: services.storage.clone(),
            inbox: services.inbox.clone(),
            router: services.router.clone(),
            timer: services.timer.clone(),
            shutdown: services.shutdown.clone(),
            metrics,
        }
    }

    /// Get uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if healthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Set health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Ready and not draining.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed) && self.shutdown.is_accepting()
    }

    /// Set ready status.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Whether new batches and control requests are accepted.
    pub fn is_accepting(&self) -> bool {
        self.shutdown.is_accepting()
    }
}

/// Admin HTTP server.
pub struct AdminServer {
    config: AdminConfig,
    state: Arc<AdminState>,
    shutdown: Arc<ShutdownManager>,
}

impl AdminServer {
    /// Create a new admin server.
    pub fn new(
        config: &AdminConfig,
        state: Arc<AdminState>,
        shutdown: Arc<ShutdownManager>,
    ) -> Self {
        Self {
            config: config.clone(),
            state,
            shutdown,
        }
    }

    /// Build the router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/stats", get(stats_handler))
            // Batches
            .route("/batches", post(create_batch_handler))
            .route("/batches/:id", get(get_batch_handler))
            .route("/batches/:id/pause", post(pause_batch_handler))
            .route("/batches/:id/resume", post(resume_batch_handler))
            // Scheduled messages
            .route("/schedules/:id", get(get_schedule_handler))
            .route("/schedules/:id/pause", post(pause_schedule_handler))
            .route("/schedules/:id/resume", post(resume_schedule_handler))
            .route(
                "/schedules/:id/confirmations",
                post(confirm_schedule_handler),
            );

        if self.config.health {
            // Kubernetes-style health endpoints
            router = router
                .route("/healthz", get(health_handler))
                .route("/livez", get(live_handler))
                .route("/readyz", get(ready_handler));
        }
        if self.config.metrics {
            router = router.route("/metrics", get(metrics_handler));
        }

        router.with_state(self.state.clone())
    }

    /// Run the admin server until shutdown terminates.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.address).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let router = self.build_router();
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(address = %listener.local_addr()?, "starting admin server");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while *shutdown_rx.borrow_and_update() != ShutdownState::Terminated {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("admin server shutting down");
            })
            .await?;

        Ok(())
    }
}
