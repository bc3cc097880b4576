//! Error taxonomy surfaced to workflow code, clients and the replay driver.
//!
//! Child outcomes travel as [`WorkflowError`] values to the exact point that awaits
//! them. [`NondeterminismError`] never reaches workflow code: it aborts the replay
//! step and is reported by the worker.

use serde::{Deserialize, Serialize};

/// Failure of a workflow or of a child observed by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WorkflowError {
    /// Workflow code returned an error of its own.
    #[error("application failure: {message}")]
    Application { message: String },

    /// A child reached the `Failed` terminal state; `cause` is the child's own failure.
    #[error("child workflow {workflow_type} ({workflow_id}) failed: {cause}")]
    ChildWorkflowFailure {
        workflow_type: String,
        workflow_id: String,
        cause: Box<WorkflowError>,
    },

    /// The backend timed the child out.
    #[error("child workflow {workflow_type} ({workflow_id}) timed out")]
    ChildWorkflowTimeout { workflow_type: String, workflow_id: String },

    /// The child settled as cancelled.
    #[error("child workflow {workflow_type} ({workflow_id}) cancelled: {reason}")]
    ChildWorkflowCancelled {
        workflow_type: String,
        workflow_id: String,
        reason: String,
    },

    /// This workflow was cancelled.
    #[error("workflow cancelled: {reason}")]
    Cancelled { reason: String },

    /// A payload could not be encoded or decoded.
    #[error("data conversion failed: {message}")]
    DataConversion { message: String },

    /// The method is not declared on the interface.
    #[error("interface {interface} has no workflow method {method}")]
    UnknownMethod { interface: String, method: String },

    /// No implementation is registered for the workflow type on the task queue.
    #[error("unregistered workflow type {workflow_type} on task queue {task_queue}")]
    UnregisteredWorkflow { workflow_type: String, task_queue: String },

    /// Replay diverged from recorded history; the instance was closed.
    #[error("nondeterministic: {message}")]
    Nondeterminism { message: String },

    /// Async wrapping of a reference that did not come from a stub.
    #[error(transparent)]
    IneligibleReference(#[from] IneligibleReferenceError),
}

impl WorkflowError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application { message: message.into() }
    }

    /// The innermost cause, following `ChildWorkflowFailure` chains.
    pub fn root_cause(&self) -> &WorkflowError {
        match self {
            Self::ChildWorkflowFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<DataConversionError> for WorkflowError {
    fn from(e: DataConversionError) -> Self {
        Self::DataConversion { message: e.to_string() }
    }
}

/// Raised at wrap time when a method reference is not eligible for async invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("method reference {method} is not eligible for async invocation: {reason}")]
pub struct IneligibleReferenceError {
    pub method: String,
    pub reason: String,
}

/// Replayed code issued a command sequence that differs from recorded history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("nondeterministic replay of {workflow_id} at event {event_index}: {message}")]
pub struct NondeterminismError {
    pub workflow_id: String,
    pub event_index: usize,
    pub message: String,
}

impl From<NondeterminismError> for WorkflowError {
    fn from(e: NondeterminismError) -> Self {
        Self::Nondeterminism { message: e.message }
    }
}

/// Registration or lookup failure in a worker's workflow registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate workflow registration: {interface} on task queue {task_queue}")]
    Duplicate { interface: String, task_queue: String },
    #[error("implementation of {interface} does not provide method {method}")]
    MissingMethod { interface: String, method: String },
    #[error("{interface} declares no method {method}")]
    UndeclaredMethod { interface: String, method: String },
}

/// Failure inside a [`crate::converter::DataConverter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataConversionError {
    #[error("encode: {0}")]
    Encode(String),
    #[error("decode: {0}")]
    Decode(String),
}
