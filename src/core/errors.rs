use thiserror::Error;

/// Unified error type for the action pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// Submission into a pool that has already been closed
    #[error("ActionPool: the current pool had already been closed.")]
    Closed,

    /// No tokio runtime was available when the pool was built
    #[error("ActionPool: no tokio runtime available: {message}")]
    NoRuntime { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// The admission gate's semaphore was closed underneath the pool
    #[error("Admission gate closed")]
    GateClosed,

    /// IO errors, raised by diagnostic sinks
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl PoolError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Misuse of the API rather than an environmental failure
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::NoRuntime { .. } => "runtime",
            Self::Configuration { .. } => "configuration",
            Self::GateClosed => "concurrency",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PoolError>;

impl From<serde_yaml::Error> for PoolError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid yaml: {}", err))
    }
}

impl From<tokio::runtime::TryCurrentError> for PoolError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        Self::NoRuntime {
            message: err.to_string(),
        }
    }
}

impl From<tokio::sync::AcquireError> for PoolError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        Self::GateClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_message_matches_panic_text() {
        let err = PoolError::Closed;
        assert_eq!(
            err.to_string(),
            "ActionPool: the current pool had already been closed."
        );
        assert!(err.is_precondition_violation());
        assert_eq!(err.category(), "closed");
    }

    #[test]
    fn test_configuration_field() {
        let err = PoolError::configuration_field("must be positive", "max_concurrent");
        if let PoolError::Configuration { message, field } = &err {
            assert_eq!(message, "must be positive");
            assert_eq!(field.as_deref(), Some("max_concurrent"));
        } else {
            panic!("Expected configuration error");
        }
        assert!(!err.is_precondition_violation());
    }

    #[test]
    fn test_io_error_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err = PoolError::io("write fault report", source);
        assert_eq!(err.category(), "io");
        assert_eq!(err.to_string(), "IO operation failed: write fault report");
        assert_eq!(std::error::Error::source(&err).map(|s| s.to_string()), Some("gone".to_string()));
    }

    #[test]
    fn test_no_runtime_outside_tokio() {
        let err: PoolError = tokio::runtime::Handle::try_current().unwrap_err().into();
        assert!(matches!(err, PoolError::NoRuntime { .. }));
    }
}
