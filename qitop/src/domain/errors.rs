//! Structured error types for qitop
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the bus collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("bus connection lost: {0}")]
    Disconnected(String),

    #[error("{service}: {reason}")]
    Call { service: String, reason: String },
}

/// Errors raised by the monitoring engine.
///
/// Three classes matter to callers:
/// - user input (`ServiceNotFound`, `MethodNotFound`, `IgnoredMethod`): the
///   selection failed and nothing changed
/// - session-fatal (see [`MonitorError::is_fatal`]): the session must end
/// - transient (`Timeout`, most `Bus` errors): logged and skipped per item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("{service}.{method} is a bus-internal method and cannot be traced")]
    IgnoredMethod { service: String, method: String },

    #[error("service directory disconnection: {0}")]
    DirectoryDisconnected(String),

    #[error("failed to subscribe to {what} of {service}: {reason}")]
    SubscriptionFailed {
        what: &'static str,
        service: String,
        reason: String,
    },

    #[error("{operation} on {service} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        service: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl MonitorError {
    /// Returns true if the error must terminate the monitoring session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirectoryDisconnected(_)
                | Self::SubscriptionFailed { .. }
                | Self::Bus(BusError::Disconnected(_))
        )
    }

    /// Returns true if the error comes from an invalid user selection.
    #[must_use]
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound(_) | Self::MethodNotFound { .. } | Self::IgnoredMethod { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write export file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_error_display() {
        let err = MonitorError::MethodNotFound {
            service: "Camera".to_string(),
            method: "getImage".to_string(),
        };
        assert_eq!(err.to_string(), "method not found: Camera.getImage");
    }

    #[test]
    fn test_error_classification() {
        assert!(MonitorError::DirectoryDisconnected("eof".into()).is_fatal());
        assert!(MonitorError::SubscriptionFailed {
            what: "traces",
            service: "Camera".into(),
            reason: "refused".into(),
        }
        .is_fatal());
        assert!(MonitorError::Bus(BusError::Disconnected("reset".into())).is_fatal());

        let user = MonitorError::ServiceNotFound("Nope".into());
        assert!(user.is_user_input());
        assert!(!user.is_fatal());

        let transient = MonitorError::Timeout {
            operation: "statistics",
            service: "Camera".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(!transient.is_fatal());
        assert!(!transient.is_user_input());
    }

    #[test]
    fn test_bus_error_converts() {
        let err: MonitorError = BusError::ServiceNotFound("Camera".into()).into();
        assert!(err.to_string().contains("Camera"));
    }
}
