use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::fields::ReferralStatus;

/// Unique indexes enforced by the referral store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    Token,
    Slug,
    IdempotencyKey,
}

impl UniqueConstraint {
    pub fn index_name(&self) -> &'static str {
        match self {
            Self::Token => "ix_referrals_token",
            Self::Slug => "ix_referrals_slug",
            Self::IdempotencyKey => "ix_referrals_referrer_user_id_idempotency_key",
        }
    }

    pub fn from_index_name(name: &str) -> Option<Self> {
        [Self::Token, Self::Slug, Self::IdempotencyKey]
            .into_iter()
            .find(|c| c.index_name() == name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {}", .0.index_name())]
    UniqueViolation(UniqueConstraint),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &value {
            if db.code().as_deref() == Some("23505") {
                if let Some(constraint) = db.constraint().and_then(UniqueConstraint::from_index_name) {
                    return Self::UniqueViolation(constraint);
                }
            }
        }

        Self::Unavailable(value.to_string())
    }
}

/// Rejections produced by the referral lifecycle.
///
/// Every variant except `Store` is a domain rejection with a stable
/// machine-readable code; `Store` is a server-class failure.
#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("user '{0}' is temporarily blocked from creating referrals")]
    FraudBlocked(Uuid),

    #[error("user '{0}' exceeded the referral creation budget")]
    RateLimited(Uuid),

    #[error("user '{0}' was not found")]
    UserNotFound(Uuid),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("referral '{0}' expired and can no longer be used")]
    Expired(Uuid),

    #[error("referral '{referral_id}' cannot {operation} from status '{from}'")]
    InvalidStateTransition {
        referral_id: Uuid,
        from: ReferralStatus,
        operation: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReferralError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FraudBlocked(_) => "referral.fraud_blocked",
            Self::RateLimited(_) => "referral.rate_limited",
            Self::UserNotFound(_) => "user.not_found",
            Self::ValidationFailed(_) => "referral.validation_failed",
            Self::NotFound(_) => "referral.not_found",
            Self::Expired(_) => "referral.expired",
            Self::InvalidStateTransition { .. } => "referral.invalid_status",
            Self::Store(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::FraudBlocked(_) => StatusCode::FORBIDDEN,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UserNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::Expired(_) => StatusCode::GONE,
            Self::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_domain_rejection(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Referral(ReferralError),
    ServerError,
    AuthenticationError,
}

impl From<ReferralError> for ApiError {
    fn from(value: ReferralError) -> Self {
        Self::Referral(value)
    }
}

impl From<StoreError> for ApiError {
    fn from(_value: StoreError) -> Self {
        Self::ServerError
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            Self::Referral(err) if err.is_domain_rejection() => {
                tracing::warn!(code = err.code(), "domain rejection >>> {}", err);
                (err.status_code(), err.code(), err.to_string())
            }
            Self::Referral(err) => {
                tracing::error!("unhandled referral failure >>> {}", err);
                server_error()
            }
            Self::ServerError => server_error(),
            Self::AuthenticationError => (
                StatusCode::UNAUTHORIZED,
                "auth.failed",
                "Authentication failed".to_string(),
            ),
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

fn server_error() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "server_error",
        "Something went wrong".to_string(),
    )
}

#[derive(Debug)]
pub enum JWTError {
    GenerationFailed(jsonwebtoken::errors::ErrorKind),
    DecodeFailed(jsonwebtoken::errors::ErrorKind),
}

impl From<JWTError> for ApiError {
    fn from(_value: JWTError) -> Self {
        Self::AuthenticationError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        let id = Uuid::new_v4();
        let cases = [
            (ReferralError::FraudBlocked(id), StatusCode::FORBIDDEN),
            (ReferralError::RateLimited(id), StatusCode::TOO_MANY_REQUESTS),
            (ReferralError::UserNotFound(id), StatusCode::NOT_FOUND),
            (ReferralError::Expired(id), StatusCode::GONE),
            (
                ReferralError::InvalidStateTransition {
                    referral_id: id,
                    from: ReferralStatus::Accepted,
                    operation: "cancel",
                },
                StatusCode::CONFLICT,
            ),
        ];

        for (err, status) in cases {
            assert!(err.is_domain_rejection());
            assert!(status.is_client_error());
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn store_failures_are_server_errors() {
        let err = ReferralError::from(StoreError::Unavailable("pool timed out".into()));
        assert!(!err.is_domain_rejection());
        assert_eq!(err.code(), "server_error");
        assert_eq!(
            ApiError::from(err).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn constraint_names_resolve() {
        assert_eq!(
            UniqueConstraint::from_index_name("ix_referrals_slug"),
            Some(UniqueConstraint::Slug)
        );
        assert_eq!(UniqueConstraint::from_index_name("pk_referrals"), None);
    }
}
