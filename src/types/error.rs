//! Error types for impact-core
//!
//! Every operation surfaces one of these kinds. The HTTP layer maps them to
//! status codes and a public message; internal detail stays in the logs.

use hyper::StatusCode;

/// Generic denial text. Never mentions how the decision was made.
pub const DENIED_MESSAGE: &str = "You do not have permission to perform this action";

/// Main error type for impact-core operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImpactError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("{}", DENIED_MESSAGE)]
    AuthorizationDenied,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImpactError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AuthorizationDenied => "AUTHORIZATION_DENIED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Transient(_) => "TRY_AGAIN_LATER",
            Self::Config(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Validation, conflict and not-found messages are actionable and are
    /// passed through. Store and configuration details are replaced.
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthenticationRequired => "Sign in to continue".to_string(),
            Self::AuthorizationDenied => DENIED_MESSAGE.to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Conflict(msg) => msg.clone(),
            Self::NotFound(msg) => format!("{msg} not found"),
            Self::Transient(_) => "Service temporarily unavailable, try again later".to_string(),
            Self::Config(_) | Self::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Whether the retry policy may re-run the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.public_message(),
            "code": self.code(),
        });
        (status, body.to_string())
    }
}

impl From<std::io::Error> for ImpactError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ImpactError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for ImpactError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for ImpactError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{
            ErrorKind, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
        };

        if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
            || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        {
            return Self::Transient(err.to_string());
        }

        match *err.kind {
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Transient(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ImpactError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transient("store call timed out".into())
    }
}

/// Result type alias for impact-core operations
pub type Result<T> = std::result::Result<T, ImpactError>;
