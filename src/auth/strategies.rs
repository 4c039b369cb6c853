//! The built-in strategies, in resolution order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AuthError, AuthRequest, AuthStrategy, IdentityService, Invoker, Principal};
use crate::security_log;
use crate::telemetry::SecurityEvent;
use crate::token::{BuildScopeTokenIssuer, SessionTokens};

/// Username plus password from a file, the command line, or a prompt.
///
/// Once a username is supplied this strategy either resolves or fails; it
/// never lets resolution continue.
pub struct ExplicitCredentials {
    identity: Arc<dyn IdentityService>,
}

impl ExplicitCredentials {
    pub fn new(identity: Arc<dyn IdentityService>) -> Self {
        Self { identity }
    }

    async fn password(
        &self,
        request: &AuthRequest,
        username: &str,
        invoker: &dyn Invoker,
    ) -> Result<Option<String>, AuthError> {
        let creds = &request.credentials;
        if let Some(path) = &creds.password_file {
            let contents = invoker.read_password_file(path).await.map_err(|e| {
                AuthError::Authentication(format!("cannot read password file {}: {}", path, e))
            })?;
            return Ok(Some(contents.trim().to_string()));
        }
        if let Some(password) = &creds.password {
            return Ok(Some(password.clone()));
        }
        invoker
            .prompt_password(&format!("Password for {}: ", username))
            .await
            .map_err(|e| AuthError::Authentication(format!("cannot prompt for password: {}", e)))
    }
}

#[async_trait]
impl AuthStrategy for ExplicitCredentials {
    fn name(&self) -> &'static str {
        "explicit"
    }

    async fn attempt(
        &self,
        request: &AuthRequest,
        invoker: &dyn Invoker,
    ) -> Result<Option<Principal>, AuthError> {
        let Some(username) = request.credentials.username.as_deref() else {
            return Ok(None);
        };

        let password = self
            .password(request, username, invoker)
            .await?
            .ok_or_else(|| AuthError::Authentication("no password specified".into()))?;

        self.identity.authenticate(username, &password)?;
        security_log!(SecurityEvent::AuthSuccess, "explicit credentials accepted", "user" => username);
        Ok(Some(Principal::User(username.to_string())))
    }
}

/// Session token the client stored at login.
pub struct StoredTokenStrategy {
    sessions: SessionTokens,
    identity: Arc<dyn IdentityService>,
}

impl StoredTokenStrategy {
    pub fn new(sessions: SessionTokens, identity: Arc<dyn IdentityService>) -> Self {
        Self { sessions, identity }
    }
}

#[async_trait]
impl AuthStrategy for StoredTokenStrategy {
    fn name(&self) -> &'static str {
        "stored_token"
    }

    async fn attempt(
        &self,
        request: &AuthRequest,
        invoker: &dyn Invoker,
    ) -> Result<Option<Principal>, AuthError> {
        let Some(token) = invoker.stored_token(&request.root_url).await? else {
            return Ok(None);
        };

        let claims = self.sessions.verify(&token)?;
        if !self.identity.user_exists(&claims.principal) {
            debug!(user = %claims.principal, "stored token names a deleted account");
            return Ok(None);
        }
        security_log!(SecurityEvent::AuthSuccess, "stored session token accepted", "user" => claims.principal.as_str());
        Ok(Some(Principal::User(claims.principal)))
    }
}

/// Ambient token of an executing run.
pub struct BuildScopeStrategy {
    issuer: Arc<BuildScopeTokenIssuer>,
}

impl BuildScopeStrategy {
    pub fn new(issuer: Arc<BuildScopeTokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl AuthStrategy for BuildScopeStrategy {
    fn name(&self) -> &'static str {
        "build_scope"
    }

    async fn attempt(
        &self,
        _request: &AuthRequest,
        invoker: &dyn Invoker,
    ) -> Result<Option<Principal>, AuthError> {
        let Some(token) = invoker.build_scope_token().await? else {
            return Ok(None);
        };

        let run_id = self.issuer.verified_run_id(&token)?;
        if self.issuer.validate(&token)? {
            security_log!(SecurityEvent::BuildScopeGrant, "build-scope token accepted", "run" => run_id.as_str());
            Ok(Some(Principal::System))
        } else {
            debug!(run = %run_id, "build-scope token for a run that is not executing");
            Ok(None)
        }
    }
}

/// Always resolves to [`Principal::Anonymous`].
#[derive(Debug, Default)]
pub struct AnonymousFallback;

#[async_trait]
impl AuthStrategy for AnonymousFallback {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn attempt(
        &self,
        _request: &AuthRequest,
        _invoker: &dyn Invoker,
    ) -> Result<Option<Principal>, AuthError> {
        Ok(Some(Principal::Anonymous))
    }
}
