use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classification of every failure the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    FileNotFound,
    PermissionDenied,
    SpawnFailure,
    ExecutionTimeout,
    ExecutionCanceled,
    NonZeroExit,
    NotFound,
    Execution,
    ShuttingDown,
}

/// Errors produced by the execution engine.
///
/// Runtime variants carry the id of the execution record they were recorded
/// on, so callers of a synchronous submission can still look the record up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("failed to spawn process: {message}")]
    SpawnFailure { id: String, message: String },

    #[error("execution timeout after {timeout:?}")]
    ExecutionTimeout { id: String, timeout: Duration },

    #[error("execution canceled")]
    ExecutionCanceled { id: String },

    #[error("process exited with code {code}")]
    NonZeroExit { id: String, code: i32 },

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution failed: {message}")]
    Execution { id: String, message: String },

    #[error("executor is shutting down")]
    ShuttingDown,
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            Self::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            Self::ExecutionCanceled { .. } => ErrorKind::ExecutionCanceled,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Id of the execution record this error was recorded on, if any.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::SpawnFailure { id, .. }
            | Self::ExecutionTimeout { id, .. }
            | Self::ExecutionCanceled { id }
            | Self::NonZeroExit { id, .. }
            | Self::Execution { id, .. } => Some(id),
            _ => None,
        }
    }

    /// True for errors raised before any record was created.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidRequest
                | ErrorKind::FileNotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::ShuttingDown
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_carry_execution_id() {
        let err = ExecutorError::NonZeroExit {
            id: "exec_1_7".to_string(),
            code: 3,
        };
        assert_eq!(err.kind(), ErrorKind::NonZeroExit);
        assert_eq!(err.execution_id(), Some("exec_1_7"));
        assert_eq!(err.to_string(), "process exited with code 3");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_validation_errors_have_no_id() {
        let err = ExecutorError::FileNotFound(PathBuf::from("/missing.sh"));
        assert!(err.is_validation());
        assert_eq!(err.execution_id(), None);
        assert_eq!(err.to_string(), "file not found: /missing.sh");
    }

    #[test]
    fn test_cancel_and_timeout_messages() {
        let canceled = ExecutorError::ExecutionCanceled { id: "a".into() };
        assert_eq!(canceled.to_string(), "execution canceled");

        let timeout = ExecutorError::ExecutionTimeout {
            id: "b".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.to_string().starts_with("execution timeout"));
    }
}
