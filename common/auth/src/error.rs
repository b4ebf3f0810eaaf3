use axum::response::{IntoResponse, Response};
use common_http_errors::ApiError;
use thiserror::Error;
use tracing::error;

use crate::claims::TokenKind;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header is not provided")]
    MissingAuthorization,
    #[error("invalid authorization header format")]
    InvalidAuthorizationFormat,
    #[error("unsupported authorization type: {0}")]
    UnsupportedScheme(String),
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("expected {expected:?} token, got {actual:?}")]
    WrongKind { expected: TokenKind, actual: TokenKind },
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
    #[error("{0} secret must be at least 32 bytes")]
    KeyTooShort(&'static str),
    #[error("authorization payload not found")]
    MissingAuthContext,
    #[error("role is not authorized to perform this action")]
    Forbidden,
    #[error("failed to look up role permissions: {0}")]
    PermissionLookup(String),
}

impl AuthError {
    /// Whether this error describes a rejected token rather than a
    /// server-side failure.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::Expired
                | AuthError::InvalidSignature
                | AuthError::Malformed(_)
                | AuthError::WrongKind { .. }
                | AuthError::InvalidClaim(_, _)
                | AuthError::InvalidJson(_)
        )
    }

    /// Message safe to hand back to a caller. Token failures collapse to a
    /// single generic message apart from expiry.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Expired => "token has expired".to_string(),
            err if err.is_token_rejection() => "token is invalid".to_string(),
            AuthError::Signing(_) | AuthError::KeyTooShort(_) | AuthError::PermissionLookup(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match value.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            _ => AuthError::Malformed(value.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match &value {
            AuthError::Forbidden => ApiError::Forbidden(value.to_string()),
            AuthError::Signing(detail) | AuthError::PermissionLookup(detail) => {
                error!(error = %detail, "auth infrastructure failure");
                ApiError::internal()
            }
            AuthError::KeyTooShort(_) => {
                error!(error = %value, "auth misconfigured");
                ApiError::internal()
            }
            _ => ApiError::Unauthorized(value.public_message()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_failures_map_to_unauthorized_with_generic_message() {
        let api: ApiError = AuthError::InvalidSignature.into();
        assert_eq!(api, ApiError::Unauthorized("token is invalid".into()));

        let api: ApiError = AuthError::WrongKind {
            expected: TokenKind::Access,
            actual: TokenKind::Refresh,
        }
        .into();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.message(), "token is invalid");

        let api: ApiError = AuthError::Expired.into();
        assert_eq!(api.message(), "token has expired");
    }

    #[test]
    fn header_failures_keep_their_message() {
        let api: ApiError = AuthError::UnsupportedScheme("Basic".into()).into();
        assert_eq!(api.message(), "unsupported authorization type: Basic");

        let api: ApiError = AuthError::MissingAuthorization.into();
        assert_eq!(api.message(), "authorization header is not provided");
    }

    #[test]
    fn forbidden_and_lookup_failures() {
        let api: ApiError = AuthError::Forbidden.into();
        assert_eq!(api.status(), StatusCode::FORBIDDEN);

        let api: ApiError = AuthError::PermissionLookup("db down".into()).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message(), "internal server error");
    }
}
