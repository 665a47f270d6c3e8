use thiserror::Error;

/// Coarse classification of a job-level failure, recorded alongside
/// dead-lettered jobs so operators know which ones are worth replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Transient infrastructure trouble (network, timeout, rate limit).
    /// The job is expected to succeed if replayed later.
    Replayable,
    /// Validation or logic failure. Replaying will fail again.
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Replayable => "replayable",
            FailureKind::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application-wide error types for Sift.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a source page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Text-analysis collaborator call failed.
    #[error("Analysis error (HTTP {status_code}): {message}")]
    AnalysisError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Image-text-extraction collaborator call failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Job payload failed validation at admission.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (tenant admission denied, or a 429 upstream).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Coordination store (rate limit window) operation failed.
    #[error("Coordination store error: {0}")]
    StoreError(String),

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Job was cancelled before it reached a terminal state.
    #[error("Job cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::AnalysisError { retryable, .. } => *retryable,
            AppError::DatabaseError(_) | AppError::StoreError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::AnalysisError {
                status_code,
                retryable,
                ..
            } => {
                // Trip on rate limits (429) and server errors (5xx)
                *status_code == 429 || *status_code >= 500 || *retryable
            }
            AppError::ExtractionError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Classify this error for dead-letter routing.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::DatabaseError(_)
            | AppError::StoreError(_) => FailureKind::Replayable,
            AppError::AnalysisError {
                retryable: true, ..
            } => FailureKind::Replayable,
            AppError::HttpError(msg) if msg.contains("timeout") || msg.contains("connect") => {
                FailureKind::Replayable
            }
            _ => FailureKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(
            AppError::AnalysisError {
                message: "server error".into(),
                status_code: 500,
                retryable: true,
            }
            .is_retryable()
        );
        assert!(!AppError::ValidationError("missing tenant".into()).is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::RateLimitExceeded.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(AppError::ExtractionError("decode failed".into()).should_trip_circuit());
        assert!(!AppError::ValidationError("bad".into()).should_trip_circuit());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            AppError::NetworkError("refused".into()).failure_kind(),
            FailureKind::Replayable
        );
        assert_eq!(
            AppError::RateLimitExceeded.failure_kind(),
            FailureKind::Replayable
        );
        assert_eq!(
            AppError::ValidationError("bad".into()).failure_kind(),
            FailureKind::Permanent
        );
        assert_eq!(AppError::Cancelled.failure_kind(), FailureKind::Permanent);
    }
}
