//! Resolving the principal a command runs as.
//!
//! The server asks an ordered list of [`AuthStrategy`] implementations in
//! turn. Strategies reach client-local state (password files, the terminal,
//! stored tokens, the ambient build-scope token) only through an [`Invoker`].

mod identity;
mod principal;
mod resolver;
mod strategies;

use async_trait::async_trait;
use thiserror::Error;

use crate::channel::{ChannelError, CredentialArgs};
use crate::token::TokenError;

pub use identity::{IdentityService, InMemoryRealm};
pub use principal::Principal;
pub use resolver::AuthenticationResolver;
pub use strategies::{AnonymousFallback, BuildScopeStrategy, ExplicitCredentials, StoredTokenStrategy};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Authentication(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Token rejected: {0}")]
    Token(#[from] TokenError),

    #[error("Client call-back failed: {0}")]
    Channel(#[from] ChannelError),
}

impl AuthError {
    /// Fatal errors end resolution instead of moving on to the next strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::InvalidCredentials)
    }
}

/// What the server knows about a command's caller before resolution.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub credentials: CredentialArgs,
    /// Key under which the client stores this server's session token.
    pub root_url: String,
}

/// Access to client-side credential sources.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Contents of a password file on the client machine.
    async fn read_password_file(&self, path: &str) -> Result<String, AuthError>;

    /// Masked prompt on the client terminal. `None` when no terminal is available.
    async fn prompt_password(&self, prompt: &str) -> Result<Option<String>, AuthError>;

    /// Session token stored on the client for `url`.
    async fn stored_token(&self, url: &str) -> Result<Option<String>, AuthError>;

    /// Build-scope token from the client's environment.
    async fn build_scope_token(&self) -> Result<Option<String>, AuthError>;
}

/// One way of establishing a principal.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this strategy does not apply or did not resolve.
    async fn attempt(
        &self,
        request: &AuthRequest,
        invoker: &dyn Invoker,
    ) -> Result<Option<Principal>, AuthError>;
}
