use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Central error type for insightflow
#[derive(Error, Debug)]
pub enum AppError {
    // ============================================================================
    // Safety Gate Errors
    // ============================================================================
    #[error("query rejected: {0}")]
    QueryRejected(String),

    // ============================================================================
    // Query Execution Errors
    // ============================================================================
    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("query failed: timed out after {}s", .0.as_secs_f64())]
    QueryTimeout(Duration),

    #[error("query failed: database unavailable: {0}")]
    DatabaseUnavailable(String),

    // ============================================================================
    // Stage Errors
    // ============================================================================
    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("Stage timed out after {}s", .0.as_secs_f64())]
    StageTimeout(Duration),

    #[error("Required state key not found: {0}")]
    MissingStateKey(String),

    #[error("State key already written: {0}")]
    DuplicateStateKey(String),

    // ============================================================================
    // Assistant Errors
    // ============================================================================
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid pipeline definition: {0}")]
    PipelineDefinition(String),

    /// Builder pattern validation error
    #[error("Builder error: {0}")]
    BuilderError(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("{0}")]
    GenericError(String),
}

/// Coarse classification used to render user-facing failure messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The safety gate refused the query
    Validation,
    /// The database could not run the query
    Execution,
    /// A remote invocation failed or produced unusable output
    Stage,
    /// Fatal at startup
    Configuration,
    /// Programming or environment faults
    Internal,
}

impl AppError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::QueryRejected(_)
            | AppError::SessionNotFound(_)
            | AppError::InvalidRequest(_) => ErrorKind::Validation,
            AppError::QueryFailed(_)
            | AppError::QueryTimeout(_)
            | AppError::DatabaseUnavailable(_) => ErrorKind::Execution,
            AppError::AgentError(_)
            | AppError::MalformedOutput(_)
            | AppError::StageTimeout(_)
            | AppError::MissingStateKey(_)
            | AppError::NetworkError(_) => ErrorKind::Stage,
            AppError::ConfigError(_)
            | AppError::PipelineDefinition(_)
            | AppError::BuilderError(_) => ErrorKind::Configuration,
            AppError::DuplicateStateKey(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::InvalidStateTransition(_)
            | AppError::GenericError(_) => ErrorKind::Internal,
        }
    }

    /// Message shown to the user when this error stops a run at `stage_name`
    ///
    /// Validation and execution errors already read "query rejected: ..." /
    /// "query failed: ...". Everything else is attributed to the stage.
    pub fn user_message(&self, stage_name: &str) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Execution => self.to_string(),
            _ => format!("stage {} failed: {}", stage_name, self),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::DatabaseUnavailable(err.to_string())
            }
            other => AppError::QueryFailed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::NetworkError(err.to_string())
    }
}

// Implement conversion to String for HTTP handlers
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

// Automatic conversion from String (for ad-hoc errors)
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::GenericError(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::GenericError(err.to_string())
    }
}

// Helper type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::QueryRejected("forbidden keyword: DROP".to_string());
        assert_eq!(err.to_string(), "query rejected: forbidden keyword: DROP");
    }

    #[test]
    fn test_timeout_is_execution_error() {
        let err = AppError::QueryTimeout(Duration::from_secs(30));
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.to_string(), "query failed: timed out after 30s");
    }

    #[test]
    fn test_user_message_names_stage() {
        let err = AppError::AgentError("503 Service Unavailable".to_string());
        let msg = err.user_message("sql_writer");
        assert!(msg.starts_with("stage sql_writer failed"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_user_message_for_rejected_query() {
        let err = AppError::QueryRejected("empty query".to_string());
        assert_eq!(err.user_message("query_executor"), "query rejected: empty query");
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = AppError::ConfigError("DATABASE_URL is not set".to_string());
        let s: String = err.into();
        assert_eq!(s, "Configuration error: DATABASE_URL is not set");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
        assert_eq!(app_err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_assistant_errors_are_validation() {
        let err = AppError::SessionNotFound("42".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Session not found: 42");
        assert_eq!(
            AppError::InvalidRequest("message must not be empty".to_string()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_pipeline_definition_is_configuration() {
        let err = AppError::PipelineDefinition("no stages".to_string());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
