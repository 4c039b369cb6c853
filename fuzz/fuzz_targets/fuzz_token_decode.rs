//! Fuzz target for session and build-scope token parsing.

#![no_main]

use std::sync::Arc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use relay_core::runs::RunRegistry;
use relay_core::token::{BuildScopeTokenIssuer, SecretKey, SessionTokens, TokenCodec};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let codec = TokenCodec::new(SecretKey::new("fuzz"));
    let sessions = SessionTokens::new(codec.clone(), Duration::from_secs(60));
    let issuer = BuildScopeTokenIssuer::new(codec, Arc::new(RunRegistry::new()));

    let _ = sessions.verify(text);
    let _ = issuer.validate(text);
});
