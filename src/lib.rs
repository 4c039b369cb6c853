//! Relay remote CLI core
//!
//! Lets a thin command-line client run named commands inside a long-running
//! automation server and get back output and an exit code.
//!
//! # Layers
//!
//! - [`transport`]: a direct TCP socket when the server advertises one, or a
//!   pair of streaming HTTP requests otherwise
//! - [`channel`]: a symmetric, multiplexed call channel over that byte stream
//! - [`auth`]: who a command runs as, resolved from explicit credentials,
//!   a stored session token, the ambient build-scope token, or anonymous
//! - [`server`] / [`client`]: the two ends of a command run
//!
//! # Security Boundaries
//!
//! - Session tokens are bound to a principal and expire.
//! - Build-scope tokens are only honored while their run is executing.
//! - Passwords and tokens never appear in logs or `Debug` output.

pub mod auth;
pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod credentials;
pub mod runs;
pub mod server;
pub mod telemetry;
pub mod token;
pub mod transport;

pub use auth::{AuthError, AuthenticationResolver, IdentityService, InMemoryRealm, Principal};
pub use channel::{Channel, ChannelConfig, ChannelError, CommandOutcome, EntryPoint};
pub use client::{CliClient, ClientError, ClientOptions};
pub use credentials::CredentialStore;
pub use runs::{RunRegistry, RunState, RunTracker};
pub use server::{Server, ServerBuilder, ServerError};
pub use token::{BuildScopeTokenIssuer, SecretKey, SessionTokens, TokenCodec, TokenError};
