//! Report endpoints.
//!
//! | Method | Path | Role |
//! |---|---|---|
//! | POST | `/api/reports` | USER |
//! | GET | `/api/reports/:id` | USER or ADMIN |
//! | PUT | `/api/reports/:id` | ADMIN |
//! | DELETE | `/api/reports/:id` | ADMIN |
//!
//! Role checks happen in [`ReportService`]; handlers only translate between
//! HTTP and the service.

use crate::WebResult;
use crate::dto::{ReportIdResponse, ReportRequestDto, ReportResultDto, ReportUpdateDto};
use crate::error::AppError;
use crate::extractors::{AuthenticatedUser, ValidJson};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conversion_report_core::report::ReportId;
use conversion_report_runtime::ReportService;

fn parse_id(raw: &str) -> Result<ReportId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid report id: {raw}")))
}

/// Accept a report request and queue it for computation.
///
/// # Errors
///
/// 400 on invalid parameters, 401 without a valid token, 403 for non-USER
/// callers, 500 if the request could not be stored or queued.
pub async fn create_report(
    State(reports): State<ReportService>,
    AuthenticatedUser(principal): AuthenticatedUser,
    ValidJson(body): ValidJson<ReportRequestDto>,
) -> WebResult<Json<ReportIdResponse>> {
    let report_id = reports.submit(&principal, body.into()).await?;
    Ok(Json(ReportIdResponse { report_id }))
}

/// Return the computed result of a request.
///
/// # Errors
///
/// 404 until the worker has completed the request.
pub async fn get_report(
    State(reports): State<ReportService>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
) -> WebResult<Json<ReportResultDto>> {
    let id = parse_id(&id)?;
    let result = reports.fetch(&principal, id).await?;
    Ok(Json(result.into()))
}

/// Replace the parameters of a request and queue it again.
///
/// # Errors
///
/// 404 for an unknown request, 409 if the supplied version is stale or
/// concurrent writes kept winning.
pub async fn update_report(
    State(reports): State<ReportService>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<ReportUpdateDto>,
) -> WebResult<StatusCode> {
    let id = parse_id(&id)?;
    let (parameters, expected) = body.into_parts();
    reports.update(&principal, id, parameters, expected).await?;
    Ok(StatusCode::OK)
}

/// Delete a request and its result.
///
/// # Errors
///
/// 404 for an unknown request, 409 if concurrent writes kept winning.
pub async fn delete_report(
    State(reports): State<ReportService>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
) -> WebResult<StatusCode> {
    let id = parse_id(&id)?;
    reports.delete(&principal, id).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id("not-a-uuid").err().map(|e| e.status());
        assert_eq!(err, Some(StatusCode::BAD_REQUEST));
        assert!(parse_id(&ReportId::new().to_string()).is_ok());
    }
}
