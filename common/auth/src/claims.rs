use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    Refresh,
    /// Short-lived token that only completes a two-factor challenge.
    #[serde(rename = "temp_2fa")]
    TwoFactor,
}

impl TokenKind {
    pub const ALL: [TokenKind; 3] = [TokenKind::Access, TokenKind::Refresh, TokenKind::TwoFactor];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::TwoFactor => "temp_2fa",
        }
    }
}

/// Identity written into a token at signing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: i64,
    pub employee_id: Option<i64>,
    pub role_id: Option<i32>,
    pub session_id: Option<Uuid>,
}

impl TokenSubject {
    /// Subject for a temp 2FA token: no role, no session.
    pub fn two_factor_challenge(user_id: i64) -> Self {
        Self {
            user_id,
            employee_id: None,
            role_id: None,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Application-focused representation of verified token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub token_id: Uuid,
    pub user_id: i64,
    pub employee_id: Option<i64>,
    pub role_id: Option<i32>,
    pub session_id: Option<Uuid>,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
}

impl Claims {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.user_id,
            employee_id: self.employee_id,
            role_id: self.role_id,
            session_id: self.session_id,
        }
    }
}

/// Wire form of the claims as signed into the JWT body.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub jti: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl From<&Claims> for ClaimsRepr {
    fn from(claims: &Claims) -> Self {
        Self {
            jti: claims.token_id.to_string(),
            sub: claims.user_id.to_string(),
            eid: claims.employee_id,
            rid: claims.role_id,
            sid: claims.session_id.map(|sid| sid.to_string()),
            kind: claims.kind,
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
            iss: claims.issuer.clone(),
        }
    }
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let token_id = Uuid::parse_str(&value.jti)
            .map_err(|_| AuthError::InvalidClaim("jti", value.jti.clone()))?;
        let user_id = value
            .sub
            .parse::<i64>()
            .map_err(|_| AuthError::InvalidClaim("sub", value.sub.clone()))?;
        let session_id = match value.sid {
            Some(sid) => Some(
                Uuid::parse_str(&sid).map_err(|_| AuthError::InvalidClaim("sid", sid.clone()))?,
            ),
            None => None,
        };

        let issued_at = Utc
            .timestamp_opt(value.iat, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("iat", value.iat.to_string()))?;
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        Ok(Self {
            token_id,
            user_id,
            employee_id: value.eid,
            role_id: value.rid,
            session_id,
            kind: value.kind,
            issued_at,
            expires_at,
            issuer: value.iss,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr =
            serde_json::from_value(value).map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        Claims::try_from(repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_uses_wire_names() {
        assert_eq!(
            serde_json::to_value(TokenKind::TwoFactor).unwrap(),
            json!("temp_2fa")
        );
        assert_eq!(TokenKind::Refresh.as_str(), "refresh");
    }

    #[test]
    fn claims_reject_non_numeric_subject() {
        let value = json!({
            "jti": Uuid::new_v4().to_string(),
            "sub": "not-a-number",
            "kind": "access",
            "iat": 1_700_000_000,
            "exp": 1_700_000_900,
            "iss": "maicare",
        });
        let err = Claims::try_from(value).expect_err("should reject");
        assert!(matches!(err, AuthError::InvalidClaim("sub", _)));
    }

    #[test]
    fn temp_subject_carries_no_role_or_session() {
        let subject = TokenSubject::two_factor_challenge(7);
        assert_eq!(subject.role_id, None);
        assert_eq!(subject.session_id, None);
        assert_eq!(subject.employee_id, None);
    }
}
