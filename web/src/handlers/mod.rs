//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by domain.

pub mod auth;
pub mod health;
pub mod reports;

// Re-export common handler utilities
pub use auth::login;
pub use health::health_check;
pub use reports::{create_report, delete_report, get_report, update_report};
