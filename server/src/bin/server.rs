//! Conversion Report Server
//!
//! Serves the HTTP API and runs the report worker pool.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! AUTH_JWT_SECRET=... cargo run --bin server
//! ```

use conversion_report_server::{Config, ReportApp, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();
    init_tracing();

    tracing::info!("Starting conversion report server...");

    let config = Config::from_env()?;
    tracing::info!(
        brokers = %config.broker.brokers,
        requests_topic = %config.broker.requests_topic,
        workers = config.worker.concurrency,
        "Configuration loaded"
    );

    let app = ReportApp::new(config).await?;
    app.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
