//! Listener for completion notices.

use conversion_report_core::message::CompletionNotice;
use conversion_report_core::queue::Settlement;
use conversion_report_runtime::MessageHandler;
use std::future::Future;
use std::pin::Pin;

/// Consumer group of the notification listener.
pub const NOTIFIER_GROUP: &str = "report-notifier";

/// Logs each completed report.
///
/// Every notice is acked; a malformed one is logged and dropped since
/// redelivering it cannot make it parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationLogger;

impl NotificationLogger {
    /// Handle one notice payload.
    #[must_use]
    pub fn on_notice(payload: &str) -> Settlement {
        match CompletionNotice::parse(payload) {
            Ok(notice) => tracing::info!(report_id = %notice.id(), "report ready"),
            Err(e) => tracing::warn!(payload, error = %e, "Ignoring malformed completion notice"),
        }
        Settlement::Ack
    }
}

impl MessageHandler for NotificationLogger {
    fn handle<'a>(&'a self, payload: &'a str) -> Pin<Box<dyn Future<Output = Settlement> + Send + 'a>> {
        Box::pin(async move { Self::on_notice(payload) })
    }
}
