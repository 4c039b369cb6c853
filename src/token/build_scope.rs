//! Tokens valid only while a specific run is executing.
//!
//! Layout: `run-id:-1:signature`. The `-1` expiry sentinel marks the token as
//! unbounded in time; validity is decided by run state alone.

use std::sync::Arc;

use super::codec::{parse_expiry, TokenCodec, TokenError, UNBOUNDED_EXPIRY};
use crate::runs::{RunState, RunTracker};

/// Environment variable carrying the build-scope token into child processes.
pub const BUILD_TOKEN_ENV: &str = "RELAY_CLI_COOKIE";

/// Environment variable carrying the run id into child processes.
pub const RUN_ID_ENV: &str = "RELAY_RUN_ID";

/// Issues and validates build-scope tokens.
pub struct BuildScopeTokenIssuer {
    codec: TokenCodec,
    runs: Arc<dyn RunTracker>,
}

impl BuildScopeTokenIssuer {
    pub fn new(codec: TokenCodec, runs: Arc<dyn RunTracker>) -> Self {
        Self { codec, runs }
    }

    /// Issue a token for `run_id`.
    pub fn issue(&self, run_id: &str) -> Result<String, TokenError> {
        if run_id.is_empty() {
            return Err(TokenError::Malformed("empty run id".into()));
        }
        self.codec.encode(&[run_id, &UNBOUNDED_EXPIRY.to_string()])
    }

    /// Check `token` against the current state of its run.
    ///
    /// Structural problems and bad signatures are errors. A run that is
    /// unknown, pending or finished yields `Ok(false)`.
    pub fn validate(&self, token: &str) -> Result<bool, TokenError> {
        let run_id = self.verified_run_id(token)?;
        let state = self.runs.run_state(&run_id);
        tracing::debug!(run_id = %run_id, state = ?state, "build-scope token checked");
        Ok(state == Some(RunState::Executing))
    }

    /// Decode `token` and return its run id without consulting run state.
    pub fn verified_run_id(&self, token: &str) -> Result<String, TokenError> {
        let mut fields = self.codec.decode(token, 2)?;
        let expiry = parse_expiry(&fields[1])?;
        if expiry != UNBOUNDED_EXPIRY {
            return Err(TokenError::Malformed(
                "build-scope token carries a time expiry".into(),
            ));
        }
        Ok(fields.swap_remove(0))
    }

    /// Environment entries a run exports to the processes it launches.
    pub fn build_environment(&self, run_id: &str) -> Result<Vec<(String, String)>, TokenError> {
        let token = self.issue(run_id)?;
        Ok(vec![
            (BUILD_TOKEN_ENV.to_string(), token),
            (RUN_ID_ENV.to_string(), run_id.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunRegistry;
    use crate::token::SecretKey;

    fn setup() -> (Arc<RunRegistry>, BuildScopeTokenIssuer) {
        let runs = Arc::new(RunRegistry::new());
        let issuer = BuildScopeTokenIssuer::new(
            TokenCodec::new(SecretKey::new("build-secret")),
            runs.clone(),
        );
        (runs, issuer)
    }

    #[test]
    fn test_token_layout() {
        let (_, issuer) = setup();
        let token = issuer.issue("job#42").unwrap();
        assert!(token.starts_with("job#42:-1:"));
    }

    #[test]
    fn test_valid_only_while_executing() {
        let (runs, issuer) = setup();
        let token = issuer.issue("job#42").unwrap();

        assert_eq!(issuer.validate(&token), Ok(false), "unknown run");
        runs.schedule("job#42");
        assert_eq!(issuer.validate(&token), Ok(false), "pending run");
        runs.begin("job#42");
        assert_eq!(issuer.validate(&token), Ok(true), "executing run");
        runs.finish("job#42");
        assert_eq!(issuer.validate(&token), Ok(false), "finished run");
    }

    #[test]
    fn test_bad_signature_is_error() {
        let (runs, issuer) = setup();
        runs.begin("job#42");
        let token = issuer.issue("job#42").unwrap();
        let forged = token.replacen("job#42", "job#43", 1);
        runs.begin("job#43");
        assert_eq!(issuer.validate(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_session_shaped_token_rejected() {
        let (runs, issuer) = setup();
        runs.begin("alice");
        let codec = TokenCodec::new(SecretKey::new("build-secret"));
        let session_like = codec.encode(&["alice", "99999999999999"]).unwrap();
        assert!(matches!(issuer.validate(&session_like), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_build_environment() {
        let (_, issuer) = setup();
        let env = issuer.build_environment("job#7").unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].0, BUILD_TOKEN_ENV);
        assert_eq!(issuer.verified_run_id(&env[0].1).unwrap(), "job#7");
        assert_eq!(env[1], (RUN_ID_ENV.to_string(), "job#7".to_string()));
    }

    #[test]
    fn test_empty_run_id_rejected() {
        let (_, issuer) = setup();
        assert!(issuer.issue("").is_err());
    }
}
