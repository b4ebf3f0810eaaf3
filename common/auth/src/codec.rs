use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::claims::{Claims, ClaimsRepr, TokenKind, TokenSubject};
use crate::config::{JwtConfig, MIN_SECRET_LEN};
use crate::error::{AuthError, AuthResult};

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn for_kind(config: &JwtConfig, kind: TokenKind) -> AuthResult<Self> {
        let secret = config.secret_for(kind);
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::KeyTooShort(kind.as_str()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// Signs and verifies HS256 tokens. Access, refresh and temp 2FA tokens each
/// use their own secret.
pub struct TokenCodec {
    issuer: String,
    leeway_seconds: u32,
    access: KeyPair,
    refresh: KeyPair,
    two_factor: KeyPair,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> AuthResult<Self> {
        Ok(Self {
            issuer: config.issuer.clone(),
            leeway_seconds: config.leeway_seconds,
            access: KeyPair::for_kind(config, TokenKind::Access)?,
            refresh: KeyPair::for_kind(config, TokenKind::Refresh)?,
            two_factor: KeyPair::for_kind(config, TokenKind::TwoFactor)?,
        })
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::TwoFactor => &self.two_factor,
        }
    }

    /// Sign a new token for `subject` that expires `ttl` from now.
    pub fn create(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
    ) -> AuthResult<(String, Claims)> {
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Signing(format!("token lifetime {ttl} is out of range")))?;
        let claims = Claims {
            token_id: Uuid::new_v4(),
            user_id: subject.user_id,
            employee_id: subject.employee_id,
            role_id: subject.role_id,
            session_id: subject.session_id,
            kind,
            issued_at,
            expires_at,
            issuer: self.issuer.clone(),
        };

        let repr = ClaimsRepr::from(&claims);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &repr,
            &self.keys(kind).encoding,
        )
        .map_err(|err| AuthError::Signing(err.to_string()))?;

        Ok((token, claims))
    }

    /// Verify `token` as a token of `expected` kind. Signature is checked
    /// before any claim is trusted.
    pub fn verify(&self, token: &str, expected: TokenKind) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.leeway_seconds.into();

        let data = decode::<Value>(token, &self.keys(expected).decoding, &validation)?;
        let claims = Claims::try_from(data.claims)?;

        if claims.kind != expected {
            return Err(AuthError::WrongKind {
                expected,
                actual: claims.kind,
            });
        }

        debug!(
            token_id = %claims.token_id,
            kind = expected.as_str(),
            "verified token"
        );
        Ok(claims)
    }

    /// Verify a token whose kind is not known up front.
    pub fn verify_any(&self, token: &str) -> AuthResult<Claims> {
        let mut last_err = AuthError::Malformed("no key accepted the token".to_string());
        for kind in TokenKind::ALL {
            match self.verify(token, kind) {
                Ok(claims) => return Ok(claims),
                Err(AuthError::InvalidSignature) => continue,
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}
