use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, span, Instrument, Level};

use crate::admin::{AdminServer, AdminState};
use crate::config::Config;
use crate::router::{self, Inbox, Router};
use crate::store::{create_storage, SharedStorage, StoreError};
use crate::telemetry::{counters, Metrics};
use crate::timer::{self, TokioTimerService};
use crate::tracking::{EventBus, TrackingLog};
use crate::transport::MockTransport;

use super::shutdown::ShutdownManager;

/// Capacity of the tracking event bus
const TRACKING_BUS_CAPACITY: usize = 4096;

/// The running scheduler: storage, inbox, router, timer, transport, and tracking.
pub struct Services {
    pub storage: SharedStorage,
    pub inbox: Inbox,
    pub router: Arc<Router>,
    pub timer: Arc<TokioTimerService>,
    pub transport: Arc<MockTransport>,
    pub bus: Arc<EventBus>,
    pub shutdown: Arc<ShutdownManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Wire the components, start the router and tracking consumer, and
    /// re-arm the timers of every armed schedule in `storage`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &Config,
        storage: SharedStorage,
        shutdown: Arc<ShutdownManager>,
    ) -> Result<Self, StoreError> {
        let (inbox, rx) = router::channel(config.router.mailbox_capacity);
        let timer = TokioTimerService::new(inbox.clone());
        let transport = MockTransport::new(&config.transport.mock, inbox.clone());
        let bus = EventBus::new(TRACKING_BUS_CAPACITY);

        let mut tasks = Vec::with_capacity(2);

        let tracking = TrackingLog::new(&bus, shutdown.subscribe());
        tasks.push(tokio::spawn(tracking.run()));

        let router = Router::new(
            config.router.clone(),
            storage.clone(),
            timer.clone(),
            transport.clone(),
            bus.clone(),
            inbox.clone(),
        );
        tasks.push(tokio::spawn(router.clone().run(rx, shutdown.subscribe())));

        let recovered = timer::recover(&storage, timer.as_ref())?;
        info!(
            recovered,
            shards = config.router.shards,
            mailbox_capacity = config.router.mailbox_capacity,
            "scheduler started"
        );

        Ok(Self {
            storage,
            inbox,
            router,
            timer,
            transport,
            bus,
            shutdown,
            tasks,
        })
    }

    /// Drain in-flight work, stop every task, and flush storage.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.start_drain();
        self.shutdown.drain(&self.inbox).await;
        self.shutdown.terminate();
        self.timer.shutdown();

        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "scheduler task failed");
                }
            }
        }

        self.storage.flush()?;
        info!("scheduler stopped");
        Ok(())
    }
}

/// Main trickled server
///
/// Components:
/// - Router: sharded load-decide-save-act over batches and scheduled messages
/// - Timer service: one wake-up per armed schedule, re-armed from storage at startup
/// - Mock transport: confirms sends back through the router
/// - Tracking log: structured record of every tracking event
/// - Admin server: health, metrics, and the batch/schedule HTTP API
/// - Shutdown manager: graceful drain with configurable timeout
pub struct Server {
    /// Configuration
    config: Arc<Config>,

    /// Shutdown manager
    shutdown: Arc<ShutdownManager>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self> {
        let shutdown = ShutdownManager::new(config.shutdown.drain_timeout);

        Ok(Self {
            config: Arc::new(config),
            shutdown,
        })
    }

    /// Run the server until shutdown
    pub async fn run(self) -> Result<()> {
        let span = span!(Level::INFO, "trickled", version = env!("CARGO_PKG_VERSION"));
        self.serve().instrument(span).await
    }

    async fn serve(self) -> Result<()> {
        info!(
            backend = ?self.config.store.backend,
            shards = self.config.router.shards,
            "starting trickled server"
        );

        let metrics = Metrics::new()?;
        counters::init(&metrics.meter("trickled"));

        let storage = create_storage(&self.config.store).await?;
        let services = Services::start(&self.config, storage, self.shutdown.clone())?;

        let admin_state = Arc::new(AdminState::new(&services, Some(metrics.clone())));
        let admin = AdminServer::new(&self.config.admin, admin_state.clone(), self.shutdown.clone());
        let admin_handle = tokio::spawn(async move {
            if let Err(e) = admin.run().await {
                error!(error = %e, "admin server failed");
            }
        });
        admin_state.set_ready(true);

        info!(
            admin_address = %self.config.admin.address,
            metrics = self.config.admin.metrics,
            health = self.config.admin.health,
            drain_timeout_secs = self.config.shutdown.drain_timeout.as_secs(),
            "trickled server started"
        );

        // Wait for shutdown signal
        self.wait_for_shutdown().await;

        info!("shutdown signal received, starting graceful shutdown");
        admin_state.set_ready(false);

        services.stop().await?;

        // Admin stops on the Terminated transition
        if let Err(e) = admin_handle.await {
            error!(error = %e, "admin server task failed");
        }

        info!("trickled server stopped");

        Ok(())
    }

    /// Wait for shutdown signal (SIGINT or SIGTERM)
    async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
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
                    error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("received SIGTERM");
            }
        }
    }

    /// Get shutdown manager
    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        self.shutdown.clone()
    }
}
