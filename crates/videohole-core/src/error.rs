//! Error types for Videohole Core

use thiserror::Error;

/// Result type alias for player and DRM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Setup errors
    #[error("{action} failed: {message}")]
    InitializationFailure { action: String, message: String },

    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    // DRM errors
    #[error("License challenge failed: {0}")]
    ChallengeFailure(String),

    #[error("Key installation failed: {0}")]
    InstallFailure(String),

    // Backend errors
    #[error("{operation} is not supported by the {backend} backend")]
    UnsupportedOperation {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("Engine error {code}: {message}")]
    EngineError { code: i32, message: String },

    #[error("{action} failed: {message}")]
    OperationFailed { action: String, message: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an initialization failure for a named action
    pub fn init(action: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InitializationFailure {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a failure for a named native call made after creation
    pub fn operation(action: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OperationFailed {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn state(msg: impl Into<String>) -> Self {
        Error::InvalidSessionState(msg.into())
    }

    /// Create a challenge failure
    pub fn challenge(msg: impl Into<String>) -> Self {
        Error::ChallengeFailure(msg.into())
    }

    /// Returns true if the public operation may be retried by the caller.
    ///
    /// DRM handshake failures are never recoverable: a failed step aborts
    /// the whole session setup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidSessionState(_) | Error::OperationFailed { .. } | Error::Network(_)
        )
    }

    /// Returns the error code reported to hosts
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InitializationFailure { .. } => "INITIALIZATION_FAILURE",
            Error::InvalidSessionState(_) => "INVALID_SESSION_STATE",
            Error::ChallengeFailure(_) => "CHALLENGE_FAILURE",
            Error::InstallFailure(_) => "INSTALL_FAILURE",
            Error::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Error::EngineError { .. } => "ENGINE_ERROR",
            Error::OperationFailed { .. } => "OPERATION_FAILED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Network(_) => "NETWORK",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::state("not ready").error_code(), "INVALID_SESSION_STATE");
        assert_eq!(Error::challenge("empty").error_code(), "CHALLENGE_FAILURE");
        assert_eq!(
            Error::UnsupportedOperation { operation: "set_volume", backend: "plus_player" }
                .error_code(),
            "UNSUPPORTED_OPERATION"
        );
    }

    #[test]
    fn test_drm_failures_not_recoverable() {
        assert!(!Error::challenge("no response").is_recoverable());
        assert!(!Error::InstallFailure("rejected".into()).is_recoverable());
        assert!(!Error::init("create_session", "loader unavailable").is_recoverable());
        assert!(Error::state("seek in flight").is_recoverable());
    }

    #[test]
    fn test_native_error_becomes_engine_error() {
        let err: Error = crate::engine::NativeError::new(-5, "decoder failure").into();
        assert!(matches!(err, Error::EngineError { code: -5, .. }));
        assert_eq!(err.error_code(), "ENGINE_ERROR");
        assert_eq!(err.to_string(), "Engine error -5: decoder failure");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_action_in_message() {
        let err = Error::operation("player_start", "invalid state");
        assert_eq!(err.to_string(), "player_start failed: invalid state");
    }
}
