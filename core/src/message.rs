//! Text payloads carried by the message bus.
//!
//! | Topic | Payload |
//! |---|---|
//! | work queue | `Report ID: <uuid>` |
//! | notifications | `REPORT_COMPLETED:<uuid>` |
//!
//! Parsing trims surrounding whitespace and accepts only the canonical
//! 36-character hyphenated UUID form.

use crate::report::ReportId;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const REPORT_PREFIX: &str = "Report ID: ";
const COMPLETED_PREFIX: &str = "REPORT_COMPLETED:";
const CANONICAL_UUID_LEN: usize = 36;

/// A payload that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The expected prefix is missing.
    #[error("Missing prefix {expected:?} in message {payload:?}")]
    MissingPrefix {
        /// Prefix that was required
        expected: &'static str,
        /// Offending payload
        payload: String,
    },

    /// The id part is not a canonical UUID.
    #[error("Invalid report id {0:?}")]
    InvalidId(String),
}

fn parse_id(raw: &str) -> Result<ReportId, MessageError> {
    if raw.len() != CANONICAL_UUID_LEN {
        return Err(MessageError::InvalidId(raw.to_string()));
    }
    Uuid::parse_str(raw)
        .map(ReportId::from_uuid)
        .map_err(|_| MessageError::InvalidId(raw.to_string()))
}

fn strip<'a>(payload: &'a str, prefix: &'static str) -> Result<&'a str, MessageError> {
    payload
        .trim()
        .strip_prefix(prefix)
        .ok_or_else(|| MessageError::MissingPrefix {
            expected: prefix,
            payload: payload.to_string(),
        })
}

/// Work queue message asking a worker to compute one report.
///
/// # Examples
///
/// ```
/// use conversion_report_core::message::ReportMessage;
/// use conversion_report_core::report::ReportId;
///
/// let id = ReportId::new();
/// let text = ReportMessage::new(id).to_string();
/// assert_eq!(ReportMessage::parse(&text).unwrap().id(), id);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReportMessage(ReportId);

impl ReportMessage {
    /// Message for the given request.
    #[must_use]
    pub const fn new(id: ReportId) -> Self {
        Self(id)
    }

    /// Request this message refers to.
    #[must_use]
    pub const fn id(self) -> ReportId {
        self.0
    }

    /// Decode `Report ID: <uuid>`.
    ///
    /// # Errors
    ///
    /// [`MessageError`] if the prefix is missing or the id is not canonical.
    pub fn parse(payload: &str) -> Result<Self, MessageError> {
        let raw = strip(payload, REPORT_PREFIX)?;
        parse_id(raw).map(Self)
    }
}

impl fmt::Display for ReportMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REPORT_PREFIX}{}", self.0)
    }
}

/// Notification that a report result is available.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompletionNotice(ReportId);

impl CompletionNotice {
    /// Notice for the given request.
    #[must_use]
    pub const fn new(id: ReportId) -> Self {
        Self(id)
    }

    /// Request that completed.
    #[must_use]
    pub const fn id(self) -> ReportId {
        self.0
    }

    /// Decode `REPORT_COMPLETED:<uuid>`.
    ///
    /// # Errors
    ///
    /// [`MessageError`] if the prefix is missing or the id is not canonical.
    pub fn parse(payload: &str) -> Result<Self, MessageError> {
        let raw = strip(payload, COMPLETED_PREFIX)?;
        parse_id(raw).map(Self)
    }
}

impl fmt::Display for CompletionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COMPLETED_PREFIX}{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ID: &str = "6f1c2a9e-3d4b-4c5d-8e7f-0a1b2c3d4e5f";

    #[test]
    fn formats_work_message() {
        let id: ReportId = ID.parse().expect("uuid");
        assert_eq!(ReportMessage::new(id).to_string(), format!("Report ID: {ID}"));
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let msg = ReportMessage::parse(&format!("  Report ID: {ID}\n")).expect("parse");
        assert_eq!(msg.id().to_string(), ID);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        assert!(matches!(
            ReportMessage::parse(&format!("Report id: {ID}")),
            Err(MessageError::MissingPrefix { .. })
        ));
        assert!(matches!(
            ReportMessage::parse(ID),
            Err(MessageError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn parse_rejects_non_canonical_ids() {
        let simple = ID.replace('-', "");
        assert!(ReportMessage::parse("Report ID: ").is_err());
        for bad in [
            "Report ID: not-a-uuid".to_string(),
            format!("Report ID: {simple}"),
            format!("Report ID: {{{ID}}}"),
            format!("Report ID: {ID} trailing"),
        ] {
            assert!(
                matches!(ReportMessage::parse(&bad), Err(MessageError::InvalidId(_))),
                "expected invalid id for {bad:?}"
            );
        }
    }

    #[test]
    fn completion_notice_format() {
        let id: ReportId = ID.parse().expect("uuid");
        let notice = CompletionNotice::new(id);
        assert_eq!(notice.to_string(), format!("REPORT_COMPLETED:{ID}"));
        assert_eq!(CompletionNotice::parse(&notice.to_string()), Ok(notice));
    }

    #[test]
    fn completion_notice_is_not_a_work_message() {
        assert!(ReportMessage::parse(&format!("REPORT_COMPLETED:{ID}")).is_err());
        assert!(CompletionNotice::parse(&format!("Report ID: {ID}")).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text in ".*") {
            let _ = ReportMessage::parse(&text);
            let _ = CompletionNotice::parse(&text);
        }

        #[test]
        fn every_uuid_survives_the_wire(bits in any::<u128>()) {
            let id = ReportId::from_uuid(Uuid::from_u128(bits));
            let parsed = ReportMessage::parse(&ReportMessage::new(id).to_string());
            prop_assert_eq!(parsed.map(ReportMessage::id), Ok(id));
        }
    }
}
