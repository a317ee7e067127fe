//! # Conversion Report Server
//!
//! Configuration and process wiring for the `server` and `notifier`
//! binaries.
//!
//! - [`config::Config`]: environment-driven settings
//! - [`app::ReportApp`]: HTTP API plus worker pool over `PostgreSQL` and Redpanda
//! - [`notifier::NotificationLogger`]: logs completion notices

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod notifier;

pub use app::{ReportApp, run_notifier};
pub use config::{Config, ConfigError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,conversion_report=debug,sqlx=warn";

/// Install the global tracing subscriber.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
