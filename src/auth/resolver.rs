use std::sync::Arc;

use tracing::{debug, warn};

use super::strategies::{AnonymousFallback, BuildScopeStrategy, ExplicitCredentials, StoredTokenStrategy};
use super::{AuthError, AuthRequest, AuthStrategy, IdentityService, Invoker, Principal};
use crate::security_log;
use crate::telemetry::SecurityEvent;
use crate::token::{BuildScopeTokenIssuer, SessionTokens};

/// Runs strategies in order; the first one that resolves wins.
pub struct AuthenticationResolver {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthenticationResolver {
    pub fn new(strategies: Vec<Box<dyn AuthStrategy>>) -> Self {
        Self { strategies }
    }

    /// Explicit credentials, stored token, build-scope token, anonymous.
    pub fn standard(
        identity: Arc<dyn IdentityService>,
        sessions: SessionTokens,
        issuer: Arc<BuildScopeTokenIssuer>,
    ) -> Self {
        Self::new(vec![
            Box::new(ExplicitCredentials::new(identity.clone())),
            Box::new(StoredTokenStrategy::new(sessions, identity)),
            Box::new(BuildScopeStrategy::new(issuer)),
            Box::new(AnonymousFallback),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve the principal for `request`.
    ///
    /// Only fatal errors are returned. Anything else is logged and the next
    /// strategy is asked. An empty or exhausted chain yields anonymous.
    pub async fn resolve(
        &self,
        request: &AuthRequest,
        invoker: &dyn Invoker,
    ) -> Result<Principal, AuthError> {
        for strategy in &self.strategies {
            match strategy.attempt(request, invoker).await {
                Ok(Some(principal)) => {
                    debug!(strategy = strategy.name(), %principal, "principal resolved");
                    return Ok(principal);
                }
                Ok(None) => continue,
                Err(e) if e.is_fatal() => {
                    let user = request.credentials.username.as_deref().unwrap_or("");
                    security_log!(SecurityEvent::AuthFailure, &e.to_string(), "strategy" => strategy.name(), "user" => user);
                    return Err(e);
                }
                Err(AuthError::Token(e)) => {
                    security_log!(SecurityEvent::TokenRejected, &e.to_string(), "strategy" => strategy.name());
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed, trying the next one");
                }
            }
        }
        Ok(Principal::Anonymous)
    }
}
