//! Time-bounded session tokens: `principal:expiry-millis:signature`.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::codec::{parse_expiry, TokenCodec, TokenError, UNBOUNDED_EXPIRY};

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Decoded, verified contents of a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub principal: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session tokens.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    codec: TokenCodec,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(codec: TokenCodec, ttl: Duration) -> Self {
        Self { codec, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token for `principal`, expiring `ttl` from now.
    pub fn issue(&self, principal: &str) -> Result<String, TokenError> {
        self.issue_at(principal, Utc::now())
    }

    pub fn issue_at(&self, principal: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| TokenError::Malformed(format!("session ttl out of range: {}", e)))?;
        let expiry = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Malformed("session ttl runs past the calendar".into()))?
            .timestamp_millis();
        self.codec.encode(&[principal, &expiry.to_string()])
    }

    /// Verify signature and expiry of `token`.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut fields = self.codec.decode(token, 2)?;
        let expiry = parse_expiry(&fields[1])?;
        if expiry == UNBOUNDED_EXPIRY {
            return Err(TokenError::Malformed("session token without expiry".into()));
        }

        let expires_at = Utc
            .timestamp_millis_opt(expiry)
            .single()
            .ok_or_else(|| TokenError::Malformed(format!("expiry out of range: {}", expiry)))?;
        if now >= expires_at {
            return Err(TokenError::Expired);
        }

        Ok(SessionClaims {
            principal: fields.swap_remove(0),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SecretKey;

    fn tokens() -> SessionTokens {
        SessionTokens::new(
            TokenCodec::new(SecretKey::new("session-secret")),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = tokens();
        let now = Utc::now();
        let token = tokens.issue_at("alice", now).unwrap();
        let claims = tokens.verify_at(&token, now).unwrap();
        assert_eq!(claims.principal, "alice");
        assert_eq!(
            claims.expires_at.timestamp_millis(),
            (now + chrono::Duration::seconds(60)).timestamp_millis()
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = tokens();
        let now = Utc::now();
        let token = tokens.issue_at("alice", now).unwrap();
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(tokens.verify_at(&token, later), Err(TokenError::Expired));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let tokens = tokens();
        let now = Utc::now();
        let token = tokens.issue_at("alice", now).unwrap();
        let claims = tokens.verify_at(&token, now).unwrap();
        assert_eq!(
            tokens.verify_at(&token, claims.expires_at),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_reissue_produces_new_token() {
        let tokens = tokens();
        let now = Utc::now();
        let first = tokens.issue_at("alice", now).unwrap();
        let second = tokens
            .issue_at("alice", now + chrono::Duration::seconds(5))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_huge_ttl_is_an_error() {
        let tokens = SessionTokens::new(
            TokenCodec::new(SecretKey::new("session-secret")),
            Duration::from_secs(100_000_000_000_000),
        );
        assert!(matches!(tokens.issue("alice"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_non_numeric_expiry_is_malformed() {
        let codec = TokenCodec::new(SecretKey::new("session-secret"));
        let token = codec.encode(&["alice", "tomorrow"]).unwrap();
        let tokens = tokens();
        assert!(matches!(tokens.verify(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_unbounded_expiry_is_not_a_session() {
        let codec = TokenCodec::new(SecretKey::new("session-secret"));
        let token = codec.encode(&["job#1", "-1"]).unwrap();
        assert!(matches!(tokens().verify(&token), Err(TokenError::Malformed(_))));
    }
}
