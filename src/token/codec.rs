//! Signed token encoding.
//!
//! A token is a list of fields joined by [`DELIMITER`], followed by a
//! signature field. The signature is the hex SHA-256 digest of
//! `field0:field1:...:N/A:<secret>`.
//!
//! SECURITY: the secret never leaves this module and is redacted from `Debug`.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Separator between token fields.
pub const DELIMITER: char = ':';

/// Expiry sentinel for tokens bounded by something other than time.
pub const UNBOUNDED_EXPIRY: i64 = -1;

/// Fixed placeholder mixed into every signature.
const SIGNATURE_PLACEHOLDER: &str = "N/A";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,
}

/// Server secret used to sign tokens.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a random 256-bit key, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(hex::encode(bytes))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Signs and verifies delimiter-joined tokens with a server secret.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    key: SecretKey,
}

impl TokenCodec {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Join `fields` and append their signature.
    pub fn encode(&self, fields: &[&str]) -> Result<String, TokenError> {
        if fields.is_empty() {
            return Err(TokenError::Malformed("no fields to encode".into()));
        }
        if let Some(bad) = fields.iter().find(|f| f.contains(DELIMITER)) {
            return Err(TokenError::Malformed(format!(
                "field {:?} contains the delimiter",
                bad
            )));
        }

        let mut token = fields.join(":");
        token.push(DELIMITER);
        token.push_str(&self.sign(fields));
        Ok(token)
    }

    /// Split `token`, check the field count, and verify its signature.
    ///
    /// `expected_fields` counts the payload fields, not the signature.
    /// Returns the payload fields on success.
    pub fn decode(&self, token: &str, expected_fields: usize) -> Result<Vec<String>, TokenError> {
        let mut parts: Vec<&str> = token.split(DELIMITER).collect();
        if parts.len() != expected_fields + 1 {
            return Err(TokenError::Malformed(format!(
                "expected {} fields, found {}",
                expected_fields + 1,
                parts.len()
            )));
        }

        let signature = parts.pop().unwrap_or_default();
        let expected = self.sign(&parts);
        if !constant_time_compare(expected.as_bytes(), signature.as_bytes()) {
            return Err(TokenError::InvalidSignature);
        }

        Ok(parts.into_iter().map(str::to_string).collect())
    }

    fn sign(&self, fields: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update(b":");
        }
        hasher.update(SIGNATURE_PLACEHOLDER.as_bytes());
        hasher.update(b":");
        hasher.update(self.key.expose().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Parse an expiry field as a signed integer.
pub fn parse_expiry(field: &str) -> Result<i64, TokenError> {
    field
        .parse::<i64>()
        .map_err(|_| TokenError::Malformed(format!("expiry is not an integer: {:?}", field)))
}

/// Constant-time comparison to prevent timing attacks.
///
/// Length mismatch returns early; lengths are public for hex digests.
pub(crate) fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
