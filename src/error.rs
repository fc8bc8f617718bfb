//! Error types for briefing generation
//!
//! Errors are classified by recoverability:
//! - Retryable: store failures on the critical path
//! - NonRetryable: local rate limiting, missing records, IO
//! - RequiresUserAction: invalid configuration that needs editing by hand

use thiserror::Error;

use crate::db::DbError;

/// Run-level errors surfaced by the orchestrator, scheduler and services.
#[derive(Debug, Error)]
pub enum ExecutionError {
    // Retryable errors
    #[error("Failed to create briefing: {0}")]
    BriefingCreation(String),

    #[error("Failed to save executive summary: {0}")]
    SummaryUpdate(String),

    #[error("Storage error: {0}")]
    Persistence(String),

    // Non-retryable errors
    #[error("Briefing generation limit reached. Try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Briefing not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(String),

    // Requires user action
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ExecutionError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::BriefingCreation(_)
                | ExecutionError::SummaryUpdate(_)
                | ExecutionError::Persistence(_)
        )
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, ExecutionError::ConfigurationError(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ExecutionError::BriefingCreation(_) | ExecutionError::SummaryUpdate(_) => {
                "The briefing could not be saved. Try generating it again."
            }
            ExecutionError::Persistence(_) => "Check that ~/.daybrief is writable and has free space.",
            ExecutionError::RateLimited { .. } => {
                "Too many briefings were requested recently. Wait and try again."
            }
            ExecutionError::NotFound(_) => "Generate a briefing first.",
            ExecutionError::IoError(_) => "Check file permissions and disk space.",
            ExecutionError::ConfigurationError(_) => {
                "Check your configuration in ~/.daybrief/config.json"
            }
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::IoError(err.to_string())
    }
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ExecutionError::NotFound(what),
            other => ExecutionError::Persistence(other.to_string()),
        }
    }
}

/// Serializable error representation attached to failed progress updates
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&ExecutionError> for WorkflowError {
    fn from(err: &ExecutionError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        WorkflowError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_persistence_failures_are_retryable() {
        assert!(ExecutionError::BriefingCreation("no id".into()).is_retryable());
        assert!(ExecutionError::SummaryUpdate("locked".into()).is_retryable());
        assert!(!ExecutionError::RateLimited { retry_after_secs: 10 }.is_retryable());
        assert!(!ExecutionError::ConfigurationError("bad cron".into()).is_retryable());
    }

    #[test]
    fn test_workflow_error_classification() {
        let err = ExecutionError::ConfigurationError("Invalid timezone: Mars/Base".into());
        let payload = WorkflowError::from(&err);
        assert_eq!(payload.error_type, ErrorType::RequiresUserAction);
        assert!(!payload.can_retry);
        assert!(payload.message.contains("Mars/Base"));

        let payload = WorkflowError::from(&ExecutionError::Persistence("disk full".into()));
        assert_eq!(payload.error_type, ErrorType::Retryable);
        assert!(payload.can_retry);

        let payload = WorkflowError::from(&ExecutionError::RateLimited { retry_after_secs: 5 });
        assert_eq!(payload.error_type, ErrorType::NonRetryable);
    }

    #[test]
    fn test_db_not_found_maps_to_not_found() {
        let err: ExecutionError = DbError::NotFound("alert 7".into()).into();
        assert!(matches!(err, ExecutionError::NotFound(_)));
    }
}
