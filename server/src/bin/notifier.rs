//! Completion notice listener.
//!
//! Logs `report ready` for every report the workers complete.
//!
//! ```bash
//! cargo run --bin notifier
//! ```

use conversion_report_server::config::BrokerConfig;
use conversion_report_server::{init_tracing, run_notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = BrokerConfig::from_env()?;
    run_notifier(&config).await
}
