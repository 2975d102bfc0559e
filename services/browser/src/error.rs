//! API error type.
//!
//! Handlers return `Result<_, ApiError>`; the error renders itself as a JSON
//! body with a stable `code` for the UI to switch on.

use crate::catalog::CatalogError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Query exceeded time budget of {0:?}")]
    Timeout(Duration),

    #[error("Failed to query catalog")]
    Store(#[source] anyhow::Error),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    /// Missing required input field
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("Missing '{field}' field"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Timeout(_) => "QUERY_TIMEOUT",
            Self::Store(_) => "QUERY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Store(e) | Self::Internal(e) => Some(format!("{e:#}")),
            Self::Timeout(budget) => Some(format!("budget {}ms", budget.as_millis())),
            _ => None,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Timeout(budget) => Self::Timeout(budget),
            CatalogError::Store(e) => Self::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.error_code(), detail = ?self.detail(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().to_string(),
            detail: self.detail(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_bad_request() {
        let err = ApiError::missing_field("query");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing 'query' field");
        assert!(err.detail().is_none());
    }

    #[test]
    fn test_store_error_keeps_generic_message_with_detail() {
        let err: ApiError = CatalogError::Store(anyhow::anyhow!("connection refused")).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to query catalog");
        assert_eq!(err.detail().as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err: ApiError = CatalogError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_code(), "QUERY_TIMEOUT");
    }
}
