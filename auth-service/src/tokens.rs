use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common_auth::{AuthResult, Claims, TokenCodec, TokenKind, TokenSubject};
use serde::Serialize;
use uuid::Uuid;

use crate::password::digest_secret;

/// Access and refresh tokens minted for a freshly created session.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokens {
    pub access: String,
    pub refresh: String,
    #[serde(skip)]
    pub session_id: Uuid,
    #[serde(skip)]
    pub refresh_expires_at: DateTime<Utc>,
}

impl IssuedTokens {
    pub fn refresh_hash(&self) -> String {
        digest_secret(&self.refresh)
    }
}

/// Applies the configured lifetimes on top of the codec.
#[derive(Clone)]
pub struct TokenIssuer {
    codec: Arc<TokenCodec>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    two_factor_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        codec: Arc<TokenCodec>,
        access_ttl: Duration,
        refresh_ttl: Duration,
        two_factor_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            access_ttl,
            refresh_ttl,
            two_factor_ttl,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Mint an access/refresh pair bound to a new session id.
    pub fn issue_session_tokens(&self, subject: TokenSubject) -> AuthResult<IssuedTokens> {
        let session_id = Uuid::new_v4();
        let subject = subject.with_session(session_id);

        let access = self.issue_access(&subject)?;
        let (refresh, refresh_claims) =
            self.codec
                .create(&subject, TokenKind::Refresh, self.refresh_ttl)?;

        Ok(IssuedTokens {
            access,
            refresh,
            session_id,
            refresh_expires_at: refresh_claims.expires_at,
        })
    }

    pub fn issue_access(&self, subject: &TokenSubject) -> AuthResult<String> {
        self.codec
            .create(subject, TokenKind::Access, self.access_ttl)
            .map(|(token, _)| token)
    }

    pub fn issue_two_factor(&self, user_id: i64) -> AuthResult<String> {
        self.codec
            .create(
                &TokenSubject::two_factor_challenge(user_id),
                TokenKind::TwoFactor,
                self.two_factor_ttl,
            )
            .map(|(token, _)| token)
    }

    pub fn verify_refresh(&self, token: &str) -> AuthResult<Claims> {
        self.codec.verify(token, TokenKind::Refresh)
    }

    pub fn verify_two_factor(&self, token: &str) -> AuthResult<Claims> {
        self.codec.verify(token, TokenKind::TwoFactor)
    }
}
