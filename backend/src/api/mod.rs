//! REST API module.
//!
//! Contains all API routes and handlers following the frontend contract.

mod admin;
mod ads;
mod auth;
mod bookmarks;
mod functions;
mod moderation;
mod notifications;
mod opportunities;
mod profiles;

pub use admin::*;
pub use ads::*;
pub use auth::*;
pub use bookmarks::*;
pub use functions::*;
pub use moderation::*;
pub use notifications::*;
pub use opportunities::*;
pub use profiles::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{format_timestamp, parse_instant};

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            status: StatusCode::OK,
        }
    }

    /// Envelope for work that continues after the response.
    pub fn accepted(data: T) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            ..Self::new(data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Reject blank required text fields.
fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Normalize a client-supplied instant to storage format.
fn normalize_instant(raw: Option<&str>, field: &str) -> Result<Option<String>, AppError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_instant(raw)
            .map(|at| Some(format_timestamp(at)))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "{} must be an RFC 3339 timestamp or a YYYY-MM-DD date",
                    field
                ))
            }),
    }
}

/// Normalize a deadline and reject one already in the past.
fn normalize_deadline(raw: Option<&str>) -> Result<Option<String>, AppError> {
    let deadline = normalize_instant(raw, "deadline")?;
    if let Some(deadline) = &deadline {
        if *deadline < format_timestamp(Utc::now()) {
            return Err(AppError::Validation(
                "deadline must not be in the past".to_string(),
            ));
        }
    }
    Ok(deadline)
}

/// Clamp a client page size into `1..=max`.
fn clamp_limit(limit: i64, max: i64) -> i64 {
    limit.clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_instant_accepts_dates() {
        assert_eq!(
            normalize_instant(Some("2030-05-01"), "deadline").unwrap(),
            Some("2030-05-01T23:59:59Z".to_string())
        );
        assert_eq!(
            normalize_instant(Some("2030-05-01T10:00:00+02:00"), "deadline").unwrap(),
            Some("2030-05-01T08:00:00Z".to_string())
        );
        assert_eq!(normalize_instant(Some("  "), "deadline").unwrap(), None);
        assert!(normalize_instant(Some("next week"), "deadline").is_err());
    }

    #[test]
    fn test_past_deadline_rejected() {
        assert!(matches!(
            normalize_deadline(Some("2001-01-01")),
            Err(AppError::Validation(_))
        ));
        assert!(normalize_deadline(Some("2999-01-01")).is_ok());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(500, 100), 100);
        assert_eq!(clamp_limit(0, 100), 1);
        assert_eq!(clamp_limit(20, 100), 20);
    }
}
