//! # Conversion Report Core
//!
//! Domain types and capability traits for the conversion report pipeline.
//!
//! A conversion report answers one question: for a product and a visual
//! layout, during a time window, what fraction of views turned into payments?
//! Reports are requested synchronously and computed asynchronously:
//!
//! ```text
//! Client ──► Intake ──► RequestStore (PENDING) ──► Work queue
//!                                                       │
//!                                                       ▼
//!                       ResultStore ◄── Worker ──► Analytics (views, payments)
//!                       RequestStore (COMPLETED)
//! ```
//!
//! This crate holds only contracts. Implementations live in sibling crates:
//!
//! - `conversion-report-postgres`: stores and analytics over Postgres
//! - `conversion-report-redpanda`: work queue over Kafka/Redpanda
//! - `conversion-report-testing`: in-memory doubles for all of the above
//!
//! ## Capabilities
//!
//! - [`store::ReportStore`] opens explicit transactions ([`store::ReportTransaction`])
//!   that carry the [`store::RequestStore`] and [`store::ResultStore`] writes
//! - [`analytics::Analytics`] counts views and payments in a window
//! - [`queue::Publisher`] and [`queue::Subscriber`] move work messages
//! - [`clock::Clock`] abstracts time for token issuance and tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analytics;
pub mod clock;
pub mod error;
pub mod message;
pub mod principal;
pub mod queue;
pub mod report;
pub mod store;

pub use analytics::{Analytics, AnalyticsError, AnalyticsQuery, ConversionCounts};
pub use clock::{Clock, SystemClock};
pub use error::ReportError;
pub use message::{CompletionNotice, MessageError, ReportMessage};
pub use principal::{Principal, Role};
pub use queue::{
    Acknowledger, Delivery, MessageStream, Publisher, QueueError, Settlement, Subscriber,
};
pub use report::{
    ReportId, ReportParameters, ReportRequest, ReportResult, ReportStatus, ValidationError,
    Version,
};
pub use store::{
    ReportStore, ReportTransaction, RequestStore, ResultStore, StoreError, StoreFuture,
};

// Re-export commonly used types
pub use chrono::NaiveDateTime;
