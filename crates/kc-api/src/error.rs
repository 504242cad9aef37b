//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from kc-state and kc-core to HTTP status codes and
//! JSON error bodies. Internal error details never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use kc_core::{PricingError, ValidationError};
use kc_state::{ConsultationError, EntitlementError, TransitionError};

/// Structured JSON error response body.
///
/// All error responses use this format. `details` carries extra context for
/// client errors and is omitted for 500-class errors.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "ENTITLEMENT_EXHAUSTED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed, including rejected status transitions (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed or contains invalid values (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication failure: missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authorization failure: insufficient permissions (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// No kit entitlement available: quota used up or subscription inactive
    /// (409). Clients fall back to the one-time paid flow.
    #[error("no kits remaining: {0}")]
    EntitlementExhausted(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),

    /// Service dependency not available (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::EntitlementExhausted(_) => (StatusCode::CONFLICT, "ENTITLEMENT_EXHAUSTED"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ConsultationError> for AppError {
    fn from(err: ConsultationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match &err {
            EntitlementError::Exhausted { .. } | EntitlementError::Inactive { .. } => {
                Self::EntitlementExhausted(err.to_string())
            }
            EntitlementError::AlreadyCancelled { .. } => Self::Validation(err.to_string()),
        }
    }
}

/// Pricing failures are configuration problems, not client errors.
impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use kc_core::SubscriptionId;
    use kc_state::SubscriptionStatus;

    #[test]
    fn not_found_status_code() {
        let (status, code) = AppError::NotFound("kit order".into()).status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");
    }

    #[test]
    fn bad_request_is_unprocessable() {
        let (status, code) = AppError::BadRequest("malformed JSON".into()).status_and_code();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "BAD_REQUEST");
    }

    #[test]
    fn entitlement_exhausted_is_conflict_with_own_code() {
        let (status, code) = AppError::EntitlementExhausted("x".into()).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "ENTITLEMENT_EXHAUSTED");
    }

    #[test]
    fn transition_error_maps_to_validation() {
        let err: AppError = TransitionError::TerminalState {
            workflow: "kit_order",
            state: "received".into(),
        }
        .into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn entitlement_errors_map_by_kind() {
        let id = SubscriptionId::new();
        let exhausted: AppError = EntitlementError::Exhausted {
            subscription_id: id,
            kits_used: 2,
            kits_allowed: 2,
        }
        .into();
        assert!(matches!(exhausted, AppError::EntitlementExhausted(_)));

        let inactive: AppError = EntitlementError::Inactive {
            subscription_id: id,
            status: SubscriptionStatus::Expired,
        }
        .into();
        assert!(matches!(inactive, AppError::EntitlementExhausted(_)));

        let cancelled: AppError = EntitlementError::AlreadyCancelled { subscription_id: id }.into();
        assert!(matches!(cancelled, AppError::Validation(_)));
    }

    #[test]
    fn pricing_error_is_internal() {
        let err: AppError = PricingError::MissingSetting("kit.base_price".into()).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn internal_error_hides_message() {
        let response = AppError::Internal("db password wrong".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body["error"]["message"].as_str().unwrap().contains("password"));
        assert!(body["error"].get("details").is_none());
    }
}
