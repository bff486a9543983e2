//! The wire error type.
//!
//! Every failure leaves the gateway as `{"error":{"code","message","details"?}}`
//! with a status from the taxonomy; internal causes are logged, never leaked.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gatehouse_auth::{AuthError, PairingError};
use gatehouse_core::envelope::ErrorEnvelope;
use gatehouse_plugins::MappedError;
use gatehouse_policy::PolicyError;
use gatehouse_store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unknown_resource(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, "unknown_resource", message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn internal(context: &str, error: &dyn std::fmt::Display) -> Self {
        tracing::error!(%error, context, "internal error");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error",
        )
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn from_mapped(mapped: MappedError) -> Self {
        ApiError {
            status: StatusCode::from_u16(mapped.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: mapped.code,
            message: mapped.message,
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut envelope = ErrorEnvelope::new(self.code, self.message);
        if let Some(details) = self.details {
            envelope = envelope.with_details(details);
        }
        (self.status, Json(envelope)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        use StatusCode as S;
        let (status, code) = match &err {
            AuthError::MissingAuth => (S::UNAUTHORIZED, "missing_auth"),
            AuthError::UnsupportedPopVersion(_) => (S::UNAUTHORIZED, "unsupported_pop_version"),
            AuthError::ExpiredTimestamp => (S::UNAUTHORIZED, "expired_timestamp"),
            AuthError::InvalidNonce => (S::UNAUTHORIZED, "invalid_nonce"),
            AuthError::InvalidSignature => (S::UNAUTHORIZED, "invalid_signature"),
            AuthError::AppNotFound => (S::UNAUTHORIZED, "app_not_found"),
            AuthError::AppDisabled => (S::FORBIDDEN, "app_disabled"),
            AuthError::InvalidPublicKey => (S::BAD_REQUEST, "invalid_request"),
            AuthError::Store(error) => return ApiError::internal("auth", error),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        use StatusCode as S;
        let (status, code) = match &err {
            PolicyError::PermissionNotFound => (S::FORBIDDEN, "permission_not_found"),
            PolicyError::NotYetValid => (S::FORBIDDEN, "not_yet_valid"),
            PolicyError::Expired => (S::FORBIDDEN, "expired"),
            PolicyError::OutsideTimeWindow => (S::FORBIDDEN, "outside_time_window"),
            PolicyError::DayNotAllowed => (S::FORBIDDEN, "day_not_allowed"),
            PolicyError::RateLimited => (S::TOO_MANY_REQUESTS, "rate_limited"),
            PolicyError::DailyQuotaExceeded => (S::FORBIDDEN, "daily_quota_exceeded"),
            PolicyError::MonthlyQuotaExceeded => (S::FORBIDDEN, "monthly_quota_exceeded"),
            PolicyError::DailyTokenBudgetExceeded => {
                (S::FORBIDDEN, "daily_token_budget_exceeded")
            }
            PolicyError::MonthlyTokenBudgetExceeded => {
                (S::FORBIDDEN, "monthly_token_budget_exceeded")
            }
            PolicyError::Store(error) => return ApiError::internal("policy", error),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<PairingError> for ApiError {
    fn from(err: PairingError) -> Self {
        use StatusCode as S;
        let (status, code) = match &err {
            PairingError::CodeNotFound | PairingError::CodeExpired | PairingError::CodeUsed => {
                (S::BAD_REQUEST, "invalid_connect_code")
            }
            PairingError::InvalidPairingString
            | PairingError::InvalidPublicKey
            | PairingError::InvalidRedirectUri
            | PairingError::InvalidResourceId(_)
            | PairingError::EmptyGrant => (S::BAD_REQUEST, "invalid_request"),
            PairingError::SessionNotFound => (S::NOT_FOUND, "session_not_found"),
            PairingError::SessionExpired => (S::GONE, "session_expired"),
            PairingError::SessionNotPending => (S::CONFLICT, "session_completed"),
            PairingError::Store(error) => return ApiError::internal("pairing", error),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::internal("store", &err)
    }
}
