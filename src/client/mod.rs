//! Client for starting top-level workflows and observing them.

use serde::{Serialize, de::DeserializeOwned};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::{Backend, BackendError, StartWorkflowRequest, WorkflowExecution, WorkflowStatus};
use crate::converter::{self, DataConverter};
use crate::errors::{DataConversionError, WorkflowError};
use crate::stub::WorkflowInterface;
use crate::Event;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    DataConversion(#[from] DataConversionError),
    /// The workflow closed as failed or cancelled.
    #[error("workflow {workflow_id} did not complete: {error}")]
    Workflow { workflow_id: String, error: WorkflowError },
    #[error("workflow {workflow_id} timed out")]
    TimedOut { workflow_id: String },
    #[error("interface {interface} has no workflow method {method}")]
    UnknownMethod { interface: String, method: String },
    #[error("stub has not started a workflow")]
    NotStarted,
    #[error("stub already started workflow {workflow_id}")]
    AlreadyStarted { workflow_id: String },
}

/// Options for a top-level workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub task_queue: String,
    /// Generated when absent.
    pub workflow_id: Option<String>,
    pub execution_timeout: Option<Duration>,
}

impl WorkflowOptions {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            ..Self::default()
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
pub struct WorkflowClient {
    backend: Arc<dyn Backend>,
    converter: Arc<dyn DataConverter>,
}

impl WorkflowClient {
    pub fn new(backend: Arc<dyn Backend>, converter: Arc<dyn DataConverter>) -> Self {
        Self { backend, converter }
    }

    /// A stub for one top-level execution of `interface`.
    pub fn new_workflow_stub(&self, interface: &WorkflowInterface, options: WorkflowOptions) -> ClientWorkflowStub {
        ClientWorkflowStub {
            client: self.clone(),
            interface: interface.clone(),
            options,
            execution: Mutex::new(None),
        }
    }

    pub async fn cancel_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), ClientError> {
        Ok(self.backend.cancel_workflow(workflow_id, reason).await?)
    }

    pub async fn describe(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>, ClientError> {
        Ok(self.backend.describe(workflow_id).await?)
    }

    pub async fn history(&self, workflow_id: &str) -> Result<Vec<Event>, ClientError> {
        Ok(self.backend.history(workflow_id).await?)
    }

    /// Wait for `workflow_id` to close and return its final status.
    pub async fn wait_for_workflow(&self, workflow_id: &str) -> Result<WorkflowStatus, ClientError> {
        Ok(self.backend.wait_for_completion(workflow_id).await?)
    }

    /// Wait for `workflow_id` and decode its result.
    pub async fn result<T: DeserializeOwned>(&self, workflow_id: &str) -> Result<T, ClientError> {
        match self.wait_for_workflow(workflow_id).await? {
            WorkflowStatus::Completed { result } => Ok(converter::decode(self.converter.as_ref(), &result)?),
            WorkflowStatus::Failed { error } => Err(ClientError::Workflow {
                workflow_id: workflow_id.to_string(),
                error,
            }),
            WorkflowStatus::Cancelled { reason } => Err(ClientError::Workflow {
                workflow_id: workflow_id.to_string(),
                error: WorkflowError::Cancelled { reason },
            }),
            WorkflowStatus::TimedOut => Err(ClientError::TimedOut {
                workflow_id: workflow_id.to_string(),
            }),
            WorkflowStatus::Running => Err(ClientError::Backend(BackendError::permanent(
                "wait_for_completion",
                format!("workflow {workflow_id} reported running after completion"),
            ))),
        }
    }
}

/// Client-side stub bound to one top-level execution.
pub struct ClientWorkflowStub {
    client: WorkflowClient,
    interface: WorkflowInterface,
    options: WorkflowOptions,
    execution: Mutex<Option<WorkflowExecution>>,
}

impl ClientWorkflowStub {
    pub fn execution(&self) -> Option<WorkflowExecution> {
        self.execution.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Start the workflow through `method` and return its identity.
    pub async fn start<A: Serialize + ?Sized>(&self, method: &str, args: &A) -> Result<WorkflowExecution, ClientError> {
        if let Some(existing) = self.execution() {
            return Err(ClientError::AlreadyStarted {
                workflow_id: existing.workflow_id,
            });
        }
        if !self.interface.declares(method) {
            return Err(ClientError::UnknownMethod {
                interface: self.interface.name().to_string(),
                method: method.to_string(),
            });
        }
        let input = converter::encode(self.client.converter.as_ref(), args)?;
        let execution = self
            .client
            .backend
            .start_workflow(StartWorkflowRequest {
                workflow_type: self.interface.name().to_string(),
                method: method.to_string(),
                workflow_id: self.options.workflow_id.clone(),
                task_queue: self.options.task_queue.clone(),
                input,
                execution_timeout: self.options.execution_timeout,
            })
            .await?;
        *self.execution.lock().unwrap_or_else(PoisonError::into_inner) = Some(execution.clone());
        Ok(execution)
    }

    /// Wait for the started workflow and decode its result.
    pub async fn result<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let execution = self.execution().ok_or(ClientError::NotStarted)?;
        self.client.result(&execution.workflow_id).await
    }

    /// Start through `method` and wait for the result.
    pub async fn execute<A, T>(&self, method: &str, args: &A) -> Result<T, ClientError>
    where
        A: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.start(method, args).await?;
        self.result().await
    }
}
