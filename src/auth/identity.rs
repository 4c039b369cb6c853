//! Account lookup and password verification.
//!
//! SECURITY: passwords are never stored. Each account keeps a random salt and
//! the SHA-256 digest of salt and password; verification compares digests in
//! constant time.

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::token::constant_time_compare;

/// Source of accounts for explicit and stored-token authentication.
pub trait IdentityService: Send + Sync {
    /// Check `password` for `username`. Unknown users and wrong passwords are
    /// both `InvalidCredentials`.
    fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError>;

    /// Whether `username` still exists.
    fn user_exists(&self, username: &str) -> bool;
}

struct Credential {
    salt: [u8; 16],
    digest: [u8; 32],
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// In-memory account table.
#[derive(Default)]
pub struct InMemoryRealm {
    users: DashMap<String, Credential>,
}

impl InMemoryRealm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account.
    pub fn add_user(&self, username: &str, password: &str) {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let credential = Credential {
            salt,
            digest: digest(&salt, password),
        };
        self.users.insert(username.to_string(), credential);
    }

    pub fn remove_user(&self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl IdentityService for InMemoryRealm {
    fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let user = self.users.get(username).ok_or(AuthError::InvalidCredentials)?;
        let candidate = digest(&user.salt, password);
        if constant_time_compare(&candidate, &user.digest) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    fn user_exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate() {
        let realm = InMemoryRealm::new();
        realm.add_user("alice", "secret");
        assert!(realm.authenticate("alice", "secret").is_ok());
        assert!(matches!(
            realm.authenticate("alice", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            realm.authenticate("mallory", "secret"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_same_password_different_digest() {
        let realm = InMemoryRealm::new();
        realm.add_user("alice", "secret");
        realm.add_user("bob", "secret");
        let a = realm.users.get("alice").unwrap().digest;
        let b = realm.users.get("bob").unwrap().digest;
        assert_ne!(a, b, "salts must differ");
    }

    #[test]
    fn test_remove_user() {
        let realm = InMemoryRealm::new();
        realm.add_user("alice", "secret");
        assert!(realm.user_exists("alice"));
        assert!(realm.remove_user("alice"));
        assert!(!realm.user_exists("alice"));
        assert!(realm.is_empty());
    }
}
