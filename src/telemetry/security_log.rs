//! Security audit logging.
//!
//! Authentication decisions and token handling are logged through one entry
//! point so they can be filtered and alerted on. Token values and passwords
//! must never appear in `message` or `details`.

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A principal was resolved from explicit credentials or a stored token.
    AuthSuccess,
    /// Explicit credentials were rejected.
    AuthFailure,
    /// A presented token failed decoding, signature or expiry checks.
    TokenRejected,
    /// A session token was issued.
    TokenIssued,
    /// A build-scope token granted the system principal.
    BuildScopeGrant,
    /// A stored session token was removed.
    Logout,
    /// Peer spoke a different protocol version.
    VersionMismatch,
    /// Direct connection opened with an unexpected preamble.
    PreambleRejected,
}

impl SecurityEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::AuthSuccess => SecuritySeverity::Info,
            Self::AuthFailure => SecuritySeverity::Warning,
            Self::TokenRejected => SecuritySeverity::Warning,
            Self::TokenIssued => SecuritySeverity::Info,
            Self::BuildScopeGrant => SecuritySeverity::Info,
            Self::Logout => SecuritySeverity::Info,
            Self::VersionMismatch => SecuritySeverity::Warning,
            Self::PreambleRejected => SecuritySeverity::Warning,
        }
    }

    /// Get a string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::TokenRejected => "token_rejected",
            Self::TokenIssued => "token_issued",
            Self::BuildScopeGrant => "build_scope_grant",
            Self::Logout => "logout",
            Self::VersionMismatch => "version_mismatch",
            Self::PreambleRejected => "preamble_rejected",
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Log a security event with structured data.
///
/// # Arguments
/// * `event` - The type of security event
/// * `message` - Human-readable description
/// * `details` - Additional structured details as key-value pairs
///
/// # Example
/// ```
/// use relay_core::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::AuthFailure,
///     "Invalid password",
///     &[("user", "alice"), ("connection", "c-1")]
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let event_type = event.as_str();
    let severity = event.severity();

    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    let log_line = if details_str.is_empty() {
        format!("SECURITY {} {}: {}", severity.as_str(), event_type, message)
    } else {
        format!(
            "SECURITY {} {}: {} | {}",
            severity.as_str(),
            event_type,
            message,
            details_str
        )
    };

    match severity {
        SecuritySeverity::Debug => {
            tracing::debug!(security.event = event_type, security.at = %timestamp, "{}", log_line)
        }
        SecuritySeverity::Info => {
            tracing::info!(security.event = event_type, security.at = %timestamp, "{}", log_line)
        }
        SecuritySeverity::Warning => {
            tracing::warn!(security.event = event_type, security.at = %timestamp, "{}", log_line)
        }
        SecuritySeverity::Error | SecuritySeverity::Critical => {
            tracing::error!(security.event = event_type, security.at = %timestamp, "{}", log_line)
        }
    }
}

/// Convenience macro for logging security events.
#[macro_export]
macro_rules! security_log {
    ($event:expr, $message:expr) => {
        $crate::telemetry::security_log::log_security_event($event, $message, &[])
    };
    ($event:expr, $message:expr, $($key:expr => $value:expr),+) => {
        $crate::telemetry::security_log::log_security_event(
            $event,
            $message,
            &[$(($key, $value)),+]
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_severity() {
        assert_eq!(
            SecurityEvent::AuthSuccess.severity(),
            SecuritySeverity::Info
        );
        assert_eq!(
            SecurityEvent::AuthFailure.severity(),
            SecuritySeverity::Warning
        );
        assert_eq!(
            SecurityEvent::PreambleRejected.severity(),
            SecuritySeverity::Warning
        );
        assert_eq!(
            SecurityEvent::BuildScopeGrant.severity(),
            SecuritySeverity::Info
        );
    }

    #[test]
    fn test_event_as_str() {
        assert_eq!(SecurityEvent::AuthSuccess.as_str(), "auth_success");
        assert_eq!(SecurityEvent::TokenRejected.as_str(), "token_rejected");
        assert_eq!(SecurityEvent::VersionMismatch.as_str(), "version_mismatch");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(SecuritySeverity::Critical > SecuritySeverity::Error);
        assert!(SecuritySeverity::Error > SecuritySeverity::Warning);
        assert!(SecuritySeverity::Warning > SecuritySeverity::Info);
        assert!(SecuritySeverity::Info > SecuritySeverity::Debug);
    }

    #[test]
    fn test_severity_as_str() {
        assert_eq!(SecuritySeverity::Debug.as_str(), "DEBUG");
        assert_eq!(SecuritySeverity::Info.as_str(), "INFO");
        assert_eq!(SecuritySeverity::Warning.as_str(), "WARNING");
        assert_eq!(SecuritySeverity::Error.as_str(), "ERROR");
        assert_eq!(SecuritySeverity::Critical.as_str(), "CRITICAL");
    }
}
