//! Orchestration backend interface and the in-process implementation.
//!
//! A backend owns instance histories and task queues. It hands out at most one
//! [`WorkflowTask`] per instance at a time, records the delta and commands a worker
//! returns, and turns commands into effects (child instances, timers, cancellation
//! requests, closure) that later show up as new events.

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::WorkflowError;
use crate::{Command, Event, WorkflowInfo};

mod error;
pub mod in_memory;

pub use error::BackendError;
pub use in_memory::InMemoryBackend;

/// Unit of work leased to a worker.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    /// Lease token; passed back to `complete_task`, `fail_task` or `abandon_task`.
    pub token: String,
    pub info: WorkflowInfo,
    /// Recorded history to replay.
    pub history: Vec<Event>,
    /// Events not yet seen by workflow code.
    pub new_events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowRequest {
    pub workflow_type: String,
    pub method: String,
    /// Generated when absent.
    pub workflow_id: Option<String>,
    pub task_queue: String,
    pub input: String,
    pub execution_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    Completed { result: String },
    Failed { error: WorkflowError },
    Cancelled { reason: String },
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<WorkflowExecution, BackendError>;

    /// Lease the next ready task on `task_queue`, if any.
    async fn dispatch_task(&self, task_queue: &str) -> Result<Option<WorkflowTask>, BackendError>;

    /// Append `history_delta` and apply `commands` in order.
    async fn complete_task(
        &self,
        token: &str,
        history_delta: Vec<Event>,
        commands: Vec<Command>,
    ) -> Result<(), BackendError>;

    /// Close the instance as failed with `error`.
    async fn fail_task(&self, token: &str, error: WorkflowError) -> Result<(), BackendError>;

    /// Release the lease; the task's events are delivered again with the next task.
    async fn abandon_task(&self, token: &str) -> Result<(), BackendError>;

    /// Request cancellation. A no-op for closed instances.
    async fn cancel_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), BackendError>;

    async fn describe(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>, BackendError>;

    async fn history(&self, workflow_id: &str) -> Result<Vec<Event>, BackendError>;

    /// Wait until the instance is closed and return its final status.
    async fn wait_for_completion(&self, workflow_id: &str) -> Result<WorkflowStatus, BackendError>;
}
