//! Process wiring.
//!
//! [`ReportApp`] owns every long-lived component of the server process:
//!
//! ```text
//!            ┌──────────────┐   Report ID: <uuid>   ┌──────────────┐
//! HTTP ────► │ ReportService│ ────────────────────► │ report-worker│ x N
//!            └──────┬───────┘       (Redpanda)      └──────┬───────┘
//!                   │                                      │
//!                   └────────────► PostgreSQL ◄────────────┘
//! ```

use crate::config::{AuthConfig, BrokerConfig, Config};
use crate::notifier::{NOTIFIER_GROUP, NotificationLogger};
use anyhow::Context;
use conversion_report_auth::{
    Authenticator, PasswordHasher, TokenService, UserRepository, seed_default_users,
};
use conversion_report_core::clock::SystemClock;
use conversion_report_core::store::ReportStore;
use conversion_report_postgres::{PostgresAnalytics, PostgresReportStore, PostgresUserRepository};
use conversion_report_redpanda::RedpandaMessageBus;
use conversion_report_runtime::metrics::MetricsServer;
use conversion_report_runtime::{QueueConsumer, ReportService, ReportWorker, RetryPolicy};
use conversion_report_web::{AppState, router};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Consumer name prefix of the worker pool.
const WORKER_NAME: &str = "report-worker";

/// The assembled report server.
pub struct ReportApp {
    config: Config,
    bus: Arc<RedpandaMessageBus>,
    service: ReportService,
    worker: ReportWorker,
    authenticator: Arc<Authenticator>,
}

impl ReportApp {
    /// Connect to the database and broker and build all components.
    ///
    /// Applies migrations and, if enabled, creates the default accounts.
    ///
    /// # Errors
    ///
    /// Fails if the database or broker is unreachable, a migration fails or
    /// the auth configuration is unusable.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = conversion_report_postgres::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.connect_timeout,
        )
        .await
        .context("Failed to connect to PostgreSQL")?;
        conversion_report_postgres::migrate(&pool)
            .await
            .context("Failed to apply migrations")?;
        info!("✓ Database ready");

        let bus = Arc::new(message_bus(&config.broker, &config.broker.consumer_group)?);
        info!(brokers = %config.broker.brokers, "✓ Message bus ready");

        let store: Arc<dyn ReportStore> = Arc::new(PostgresReportStore::new(pool.clone()));
        let analytics = Arc::new(PostgresAnalytics::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(PostgresUserRepository::new(pool));

        let retry = RetryPolicy::builder()
            .max_attempts(config.worker.max_attempts)
            .build();
        let service = ReportService::new(
            Arc::clone(&store),
            bus.clone(),
            config.broker.requests_topic.clone(),
        )
        .with_retry_policy(retry.clone());

        let mut worker = ReportWorker::new(store, analytics).with_retry_policy(retry);
        if config.broker.notifications_enabled {
            worker = worker.with_notifications(
                bus.clone(),
                config.broker.notifications_topic.clone(),
            );
        }

        let authenticator = Arc::new(authenticator(&config.auth, users)?);
        if config.auth.seed_default_users {
            let created = seed_default_users(authenticator.users(), authenticator.hasher())
                .await
                .context("Failed to seed default users")?;
            info!(created, "✓ Default users checked");
        }

        Ok(Self {
            config,
            bus,
            service,
            worker,
            authenticator,
        })
    }

    /// Serve HTTP and run the worker pool until ctrl-c.
    ///
    /// On shutdown the HTTP server drains in-flight requests, then every
    /// worker finishes its current delivery and stops.
    ///
    /// # Errors
    ///
    /// Fails if the metrics exporter or HTTP listener cannot start.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let _metrics = match self.config.server.metrics_addr() {
            Some(addr) => {
                let mut metrics = MetricsServer::new(addr);
                metrics.start().context("Failed to start metrics exporter")?;
                Some(metrics)
            }
            None => None,
        };

        let workers = QueueConsumer::builder()
            .name(WORKER_NAME)
            .topic(self.config.broker.requests_topic.clone())
            .subscriber(self.bus.clone())
            .handler(Arc::new(self.worker))
            .build_pool(self.config.worker.concurrency, &shutdown_tx)?;
        let handles: Vec<JoinHandle<()>> = workers.into_iter().map(QueueConsumer::spawn).collect();
        info!(
            workers = handles.len(),
            topic = %self.config.broker.requests_topic,
            "✓ Worker pool started"
        );

        let app = router(
            AppState::new(self.service, self.authenticator),
            self.config.server.request_timeout,
        );
        let addr = self.config.server.bind_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(%addr, "✓ HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        stop(&shutdown_tx, handles).await;
        Ok(())
    }
}

/// Run the completion notice listener until ctrl-c.
///
/// # Errors
///
/// Fails if the broker client cannot be created.
pub async fn run_notifier(config: &BrokerConfig) -> anyhow::Result<()> {
    let bus = Arc::new(message_bus(config, NOTIFIER_GROUP)?);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let consumer = QueueConsumer::builder()
        .name("report-notifier")
        .topic(config.notifications_topic.clone())
        .subscriber(bus)
        .handler(Arc::new(NotificationLogger))
        .shutdown(shutdown_rx)
        .build()?;
    let handle = consumer.spawn();
    info!(topic = %config.notifications_topic, "✓ Listening for completed reports");

    shutdown_signal().await;
    stop(&shutdown_tx, vec![handle]).await;
    Ok(())
}

fn message_bus(config: &BrokerConfig, group: &str) -> anyhow::Result<RedpandaMessageBus> {
    RedpandaMessageBus::builder()
        .brokers(config.brokers.clone())
        .consumer_group(group)
        .nack_delay(config.nack_delay)
        .build()
        .context("Failed to create broker client")
}

fn authenticator(
    config: &AuthConfig,
    users: Arc<dyn UserRepository>,
) -> anyhow::Result<Authenticator> {
    let clock = Arc::new(SystemClock);
    let tokens = match &config.jwt_secret {
        Some(secret) => TokenService::new(secret.as_bytes(), config.token_ttl, clock)?,
        None => {
            warn!("AUTH_JWT_SECRET not set; tokens will not survive a restart");
            TokenService::ephemeral(config.token_ttl, clock)?
        }
    };
    let hasher = PasswordHasher::new(config.bcrypt_cost)?;
    Ok(Authenticator::new(users, tokens, hasher))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully...");
}

async fn stop(shutdown: &broadcast::Sender<()>, handles: Vec<JoinHandle<()>>) {
    // No receivers left means every consumer already exited.
    let _ = shutdown.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Consumer task failed");
        }
    }
}
