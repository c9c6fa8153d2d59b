use thiserror::Error;

/// Application-wide error types for chapterwatch.
///
/// Anti-bot challenges are not errors: they surface as
/// [`Classification::Challenge`](crate::challenge::Classification) and drive
/// tier escalation inside the orchestrator.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed or returned an unusable status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Every fetch tier was refused by the host.
    #[error("Blocked: {0}")]
    Blocked(String),

    /// The render collaborator produced nothing usable.
    #[error("Render unavailable: {0}")]
    RenderUnavailable(String),

    /// A URL could not be parsed or normalized.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A chapter URL template is malformed.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// A custom extraction pattern does not compile.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration is missing or malformed.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying within the
    /// direct HTTP tier.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true for errors raised while validating user input, before
    /// anything reaches the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidUrl(_) | AppError::InvalidTemplate(_) | AppError::InvalidPattern(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::HttpError("connection reset by peer".into()).is_retryable());
        assert!(!AppError::HttpError("HTTP 404".into()).is_retryable());
        assert!(!AppError::Blocked("403".into()).is_retryable());
        assert!(!AppError::InvalidUrl("x".into()).is_retryable());
    }

    #[test]
    fn test_validation_errors() {
        assert!(AppError::InvalidTemplate("no token".into()).is_validation());
        assert!(AppError::InvalidPattern("(".into()).is_validation());
        assert!(!AppError::RenderUnavailable("empty".into()).is_validation());
    }
}
