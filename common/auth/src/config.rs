use std::fmt;

use crate::claims::TokenKind;

/// Minimum length, in bytes, of every HMAC signing secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Runtime configuration for signing and verifying tokens.
///
/// Each token kind is signed with its own secret so a token of one kind can
/// never verify as another.
#[derive(Clone)]
pub struct JwtConfig {
    /// Issuer claim (iss) written into and required from every token.
    pub issuer: String,
    /// Allowable clock skew in seconds when validating exp.
    pub leeway_seconds: u32,
    pub access_secret: String,
    pub refresh_secret: String,
    pub two_factor_secret: String,
}

impl JwtConfig {
    pub fn new(
        issuer: impl Into<String>,
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        two_factor_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            leeway_seconds: 0,
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            two_factor_secret: two_factor_secret.into(),
        }
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn secret_for(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
            TokenKind::TwoFactor => &self.two_factor_secret,
        }
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("access_secret", &"[hidden]")
            .field("refresh_secret", &"[hidden]")
            .field("two_factor_secret", &"[hidden]")
            .finish()
    }
}
