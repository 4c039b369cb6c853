//! Span utilities and extension traits for command tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for creating standardized command spans.
pub struct CommandSpan;

impl CommandSpan {
    /// Create a new command span with standard fields.
    ///
    /// Fields included:
    /// - `command`: Command name being executed
    /// - `connection_id`: Channel the command arrived on
    /// - `principal`: To be filled in once authentication resolves
    /// - `exit_code`: To be filled in after completion
    /// - `status` / `error.message`: To be filled in by `SpanExt::record_result`
    pub fn new(command: &str, connection_id: &str) -> Span {
        info_span!(
            "command",
            command = %command,
            connection_id = %connection_id,
            principal = tracing::field::Empty,
            exit_code = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
