//! JSON request and response bodies.
//!
//! Field names are camelCase on the wire. Timestamps are ISO-8601 local
//! date-times such as `2024-01-01T00:00:00`; seconds and fractions may be
//! omitted (`2024-01-01T00:00`).

use chrono::NaiveDateTime;
use conversion_report_core::report::{ReportId, ReportParameters, ReportResult, Version};
use serde::{Deserialize, Deserializer, Serialize};

const MINUTE_PRECISION: &str = "%Y-%m-%dT%H:%M";

/// Parse an ISO-8601 local date-time with optional seconds.
fn local_date_time<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, MINUTE_PRECISION))
        .map_err(|e| serde::de::Error::custom(format!("invalid local date-time `{raw}`: {e}")))
}

/// Body of `POST /api/reports`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequestDto {
    /// Product to report on.
    pub product_id: String,
    /// Layout to report on.
    pub layout_id: String,
    /// Window start, inclusive.
    #[serde(deserialize_with = "local_date_time")]
    pub start_date: NaiveDateTime,
    /// Window end, inclusive.
    #[serde(deserialize_with = "local_date_time")]
    pub end_date: NaiveDateTime,
}

impl From<ReportRequestDto> for ReportParameters {
    fn from(dto: ReportRequestDto) -> Self {
        Self::new(dto.product_id, dto.layout_id, dto.start_date, dto.end_date)
    }
}

/// Body of `PUT /api/reports/{id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportUpdateDto {
    /// Product to report on.
    pub product_id: String,
    /// Layout to report on.
    pub layout_id: String,
    /// Window start, inclusive.
    #[serde(deserialize_with = "local_date_time")]
    pub start_date: NaiveDateTime,
    /// Window end, inclusive.
    #[serde(deserialize_with = "local_date_time")]
    pub end_date: NaiveDateTime,
    /// Version the caller last saw; the stored version is used when absent.
    #[serde(default)]
    pub version: Option<u64>,
}

impl ReportUpdateDto {
    /// Split into parameters and the expected version.
    #[must_use]
    pub fn into_parts(self) -> (ReportParameters, Option<Version>) {
        (
            ReportParameters::new(self.product_id, self.layout_id, self.start_date, self.end_date),
            self.version.map(Version::new),
        )
    }
}

/// Response of `POST /api/reports`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIdResponse {
    /// Identifier of the accepted request.
    pub report_id: ReportId,
}

/// Response of `GET /api/reports/{id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResultDto {
    /// Identifier of the request this result belongs to.
    pub request_id: ReportId,
    /// Payments per view.
    pub conversion_ratio: f64,
    /// Payments in the window.
    pub payment_count: u64,
}

impl From<ReportResult> for ReportResultDto {
    fn from(result: ReportResult) -> Self {
        Self {
            request_id: result.request_id,
            conversion_ratio: result.conversion_ratio,
            payment_count: result.payment_count,
        }
    }
}

/// Body of `POST /api/auth/login`.
#[derive(Deserialize, Serialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

/// Response of `POST /api/auth/login`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Bearer token for the `Authorization` header.
    pub token: String,
}
