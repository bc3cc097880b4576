/// Backend failure with a retry classification.
///
/// **Retryable**: contention or transient unavailability; the worker retries with
/// backoff. **Permanent**: unknown task token, unknown workflow id, duplicate start;
/// retrying cannot help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {message}")]
pub struct BackendError {
    /// Operation that failed, e.g. `"complete_task"`.
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}
