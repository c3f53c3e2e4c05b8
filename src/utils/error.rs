//! Centralized error types for the session service
//!
//! Library code returns [`ServiceError`]. The CLI and gateway wrap it with `anyhow`
//! for context.

use thiserror::Error;

/// Errors surfaced by the session registry, dispatcher and service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed session identifier; never creates state
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The conversation factory failed; nothing was registered
    #[error("Failed to create conversation: {message}")]
    ResourceCreationFailed { message: String },

    /// `send_and_run` failed; the session stays registered and usable
    #[error("Conversation {session_id} failed: {message}")]
    Resource { session_id: String, message: String },

    /// The caller stopped waiting; the underlying work may still be running
    #[error("Request on session {session_id} timed out after {duration_secs}s")]
    Timeout {
        session_id: String,
        duration_secs: u64,
    },

    /// A request arrived after the drain started
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl ServiceError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a resource creation error
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::ResourceCreationFailed {
            message: message.into(),
        }
    }

    /// Create a resource error for a session
    pub fn resource(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(session_id: impl Into<String>, duration_secs: u64) -> Self {
        Self::Timeout {
            session_id: session_id.into(),
            duration_secs,
        }
    }

    /// Session id carried by the error, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServiceError::Resource { session_id, .. } | ServiceError::Timeout { session_id, .. } => {
                Some(session_id)
            }
            _ => None,
        }
    }

    /// Returns true if the caller may retry the same request
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Caller fixes or omits the id
            ServiceError::InvalidArgument { .. } => true,
            ServiceError::ResourceCreationFailed { .. } => true,
            ServiceError::Resource { .. } => true,
            // Same session id stays valid
            ServiceError::Timeout { .. } => true,
            ServiceError::ShuttingDown => false,
        }
    }

    /// Returns the log level this error should be reported at
    pub fn severity(&self) -> tracing::Level {
        match self {
            ServiceError::InvalidArgument { .. } => tracing::Level::INFO,
            ServiceError::ResourceCreationFailed { .. } => tracing::Level::ERROR,
            ServiceError::Resource { .. } => tracing::Level::WARN,
            ServiceError::Timeout { .. } => tracing::Level::WARN,
            ServiceError::ShuttingDown => tracing::Level::INFO,
        }
    }

    /// Stable machine-readable code for wire responses
    pub fn client_code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument { .. } => "invalid_argument",
            ServiceError::ResourceCreationFailed { .. } => "resource_creation_failed",
            ServiceError::Resource { .. } => "resource_error",
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::ShuttingDown => "shutting_down",
        }
    }
}

/// Result type alias using ServiceError
pub type Result<T> = std::result::Result<T, ServiceError>;
