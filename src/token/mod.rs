//! Signed, tamper-evident tokens.
//!
//! - [`TokenCodec`]: field encoding and signature checks
//! - [`SessionTokens`]: time-bounded login tokens
//! - [`BuildScopeTokenIssuer`]: tokens tied to an executing run

mod build_scope;
mod codec;
mod session;

pub use build_scope::{BuildScopeTokenIssuer, BUILD_TOKEN_ENV, RUN_ID_ENV};
pub use codec::{parse_expiry, SecretKey, TokenCodec, TokenError, DELIMITER, UNBOUNDED_EXPIRY};
pub(crate) use codec::constant_time_compare;
pub use session::{SessionClaims, SessionTokens, DEFAULT_SESSION_TTL};
