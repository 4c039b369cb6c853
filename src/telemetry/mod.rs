//! Telemetry: structured logging, security audit events and command spans.
//!
//! Everything goes through `tracing`; nothing here opens network connections.

mod logging;
pub mod security_log;
mod spans;

pub use logging::{
    init_logging, LogConfig, LogError, LogFormat, LOG_FILE_ENV, LOG_FILTER_ENV, LOG_FORMAT_ENV,
};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{CommandSpan, SpanExt};
