use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::claims::{Claims, TokenKind};
use crate::codec::TokenCodec;
use crate::error::{AuthError, AuthResult};

/// Verified identity attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    pub fn user_id(&self) -> i64 {
        self.claims.user_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingAuthContext)
    }
}

/// Verify the bearer access token on `headers`.
pub fn authenticate(headers: &HeaderMap, codec: &TokenCodec) -> AuthResult<AuthContext> {
    let header_value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorization)?;

    let token = parse_bearer(header_value)?;
    let claims = codec.verify(&token, TokenKind::Access)?;

    Ok(AuthContext { claims, token })
}

/// Middleware gate for bearer-protected routes.
pub async fn require_auth(
    State(codec): State<Arc<TokenCodec>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = authenticate(req.headers(), &codec).map_err(|err| {
        debug!(error = %err, path = %req.uri().path(), "rejected request");
        err
    })?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

fn parse_bearer(value: &HeaderValue) -> AuthResult<String> {
    let raw = value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorizationFormat)?;

    let fields: Vec<&str> = raw.split_whitespace().collect();
    let [scheme, token] = fields.as_slice() else {
        return Err(AuthError::InvalidAuthorizationFormat);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::UnsupportedScheme(scheme.to_lowercase()));
    }

    Ok((*token).to_owned())
}
