use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
    /// Human-readable description naming the failed precondition
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the client may retry the same request unchanged
    pub retryable: bool,
    pub timestamp: String,
}

/// Coarse error taxonomy shared by all operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientResource,
    ExternalDependency,
    Auth,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Order {order_id} is not cancellable: {reason}")]
    NotCancellable { order_id: Uuid, reason: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Insufficient wallet balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Coupon invalid: {0}")]
    CouponInvalid(String),

    #[error("Coupon expired: {0}")]
    CouponExpired(String),

    #[error("Coupon usage limit reached: {0}")]
    UsageLimitReached(String),

    #[error("Coupon already used: {0}")]
    AlreadyUsed(String),

    #[error("Order subtotal {subtotal} is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: i64, subtotal: i64 },

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<sea_orm::TransactionError<ServiceError>> for ServiceError {
    fn from(err: sea_orm::TransactionError<ServiceError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(db) => ServiceError::DatabaseError(db),
            sea_orm::TransactionError::Transaction(inner) => inner,
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_)
            | Self::NotCancellable { .. }
            | Self::InvalidTransition { .. }
            | Self::CouponInvalid(_)
            | Self::CouponExpired(_)
            | Self::UsageLimitReached(_)
            | Self::AlreadyUsed(_)
            | Self::BelowMinimum { .. } => ErrorKind::Conflict,
            Self::InsufficientStock(_) | Self::InsufficientBalance { .. } => {
                ErrorKind::InsufficientResource
            }
            Self::PaymentVerificationFailed(_)
            | Self::ExternalServiceError(_)
            | Self::CircuitBreakerOpen => ErrorKind::ExternalDependency,
            Self::Unauthorized(_) | Self::Forbidden(_) => ErrorKind::Auth,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable code clients can switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotCancellable { .. } => "not_cancellable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::CouponInvalid(_) => "coupon_invalid",
            Self::CouponExpired(_) => "coupon_expired",
            Self::UsageLimitReached(_) => "usage_limit_reached",
            Self::AlreadyUsed(_) => "coupon_already_used",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::PaymentVerificationFailed(_) => "payment_verification_failed",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::CircuitBreakerOpen => "service_unavailable",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Only failures of external dependencies may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExternalDependency
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InsufficientStock(_) | Self::InsufficientBalance { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PaymentVerificationFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::CONFLICT,
        }
    }

    /// Message suitable for HTTP responses; internal details are withheld.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::CircuitBreakerOpen => {
                "Payment gateway temporarily unavailable, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "request failed with internal error");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            retryable: self.is_retryable(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;

    #[tokio::test]
    async fn error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("order 42".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "not_found");
        assert!(!payload.retryable);
    }

    #[rstest]
    #[case(ServiceError::ValidationError("x".into()), ErrorKind::Validation, StatusCode::BAD_REQUEST)]
    #[case(ServiceError::NotFound("x".into()), ErrorKind::NotFound, StatusCode::NOT_FOUND)]
    #[case(ServiceError::AlreadyUsed("SAVE10".into()), ErrorKind::Conflict, StatusCode::CONFLICT)]
    #[case(
        ServiceError::BelowMinimum { minimum: 100, subtotal: 50 },
        ErrorKind::Conflict,
        StatusCode::CONFLICT
    )]
    #[case(
        ServiceError::InsufficientBalance { required: 10, available: 5 },
        ErrorKind::InsufficientResource,
        StatusCode::UNPROCESSABLE_ENTITY
    )]
    #[case(
        ServiceError::PaymentVerificationFailed("bad signature".into()),
        ErrorKind::ExternalDependency,
        StatusCode::PAYMENT_REQUIRED
    )]
    #[case(ServiceError::CircuitBreakerOpen, ErrorKind::ExternalDependency, StatusCode::SERVICE_UNAVAILABLE)]
    #[case(ServiceError::InternalError("x".into()), ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_kind_and_status(
        #[case] error: ServiceError,
        #[case] kind: ErrorKind,
        #[case] status: StatusCode,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.status_code(), status);
    }

    #[test]
    fn only_external_failures_are_retryable() {
        assert!(ServiceError::ExternalServiceError("timeout".into()).is_retryable());
        assert!(!ServiceError::InsufficientStock("book".into()).is_retryable());
        assert!(!ServiceError::Conflict("terminal".into()).is_retryable());
    }

    #[test]
    fn internal_details_are_hidden() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("pool exhausted".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFound("Order 7".into()).response_message(),
            "Not found: Order 7"
        );
    }
}
