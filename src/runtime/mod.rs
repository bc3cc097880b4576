//! Workflow runtime: the per-instance execution machinery and the worker that drives
//! it from a backend task queue.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::WorkflowContext;
use crate::backend::Backend;
use crate::converter::DataConverter;
use crate::errors::{RegistryError, WorkflowError};

pub mod children;
mod dispatcher;
pub mod execution;
pub mod registry;
pub mod scheduler;

pub use registry::{WorkflowImplementation, WorkflowImplementationBuilder, WorkflowRegistry};

/// Entry point of one workflow method.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, WorkflowError>;
}

/// Function wrapper that implements `WorkflowHandler`.
pub struct FnWorkflow<F, Fut>(pub F)
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static;

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F, Fut>
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static,
{
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, WorkflowError> {
        (self.0)(ctx, input).await
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Poll interval when the task queue is empty. Default: 10ms.
    pub dispatcher_idle_sleep: Duration,
    /// Retries of `complete_task` on retryable backend errors before the task is
    /// abandoned. Default: 5.
    pub max_ack_attempts: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            dispatcher_idle_sleep: Duration::from_millis(10),
            max_ack_attempts: 5,
        }
    }
}

/// Polls one task queue and runs the workflows registered on it.
pub struct Worker {
    task_queue: String,
    backend: Arc<dyn Backend>,
    converter: Arc<dyn DataConverter>,
    options: WorkerOptions,
    registry: WorkflowRegistry,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn Backend>,
        task_queue: impl Into<String>,
        converter: Arc<dyn DataConverter>,
        options: WorkerOptions,
    ) -> Self {
        let task_queue = task_queue.into();
        Self {
            registry: WorkflowRegistry::new(task_queue.clone()),
            task_queue,
            backend,
            converter,
            options,
        }
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Register implementations on this worker's queue. Stops at the first duplicate.
    pub fn register_workflow_implementation_types<I>(&mut self, implementations: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = WorkflowImplementation>,
    {
        for implementation in implementations {
            self.registry.register(implementation)?;
        }
        Ok(())
    }

    /// Spawn the dispatcher loop on the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        crate::logging::init_default_subscriber();
        let task_queue = self.task_queue.clone();
        tracing::debug!(task_queue = %task_queue, workflows = ?self.registry.names(), "starting worker");
        let worker = Arc::new(self);
        let join = tokio::spawn(async move { worker.run_dispatcher().await });
        WorkerHandle { task_queue, join }
    }
}

pub struct WorkerHandle {
    task_queue: String,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// Stop polling. A task in progress is dropped and its lease is never completed.
    pub async fn shutdown(self) {
        self.join.abort();
        let _ = self.join.await;
    }
}
