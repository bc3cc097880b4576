use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::execution;
use super::{Worker, WorkflowHandler};
use crate::backend::{BackendError, WorkflowTask};
use crate::errors::{NondeterminismError, WorkflowError};
use crate::{Command, Event};

impl Worker {
    pub(super) async fn run_dispatcher(self: Arc<Self>) {
        loop {
            match self.backend.dispatch_task(&self.task_queue).await {
                Ok(Some(task)) => self.process_task(task).await,
                Ok(None) => tokio::time::sleep(self.options.dispatcher_idle_sleep).await,
                Err(e) => {
                    warn!(task_queue = %self.task_queue, error = %e, "dispatch_task failed");
                    tokio::time::sleep(self.options.dispatcher_idle_sleep).await;
                }
            }
        }
    }

    async fn process_task(&self, task: WorkflowTask) {
        let info = &task.info;
        debug!(
            workflow_id = %info.workflow_id,
            workflow_type = %info.workflow_type,
            history_len = task.history.len(),
            new_events = task.new_events.len(),
            "processing workflow task"
        );

        let Some(handler) = self.registry.resolve(&info.workflow_type, &info.method) else {
            warn!(
                workflow_id = %info.workflow_id,
                workflow_type = %info.workflow_type,
                task_queue = %self.task_queue,
                "no implementation registered; failing workflow"
            );
            let fail = Command::FailWorkflow {
                error: WorkflowError::UnregisteredWorkflow {
                    workflow_type: info.workflow_type.clone(),
                    task_queue: self.task_queue.clone(),
                },
            };
            let mut delta = task.new_events.clone();
            delta.push(fail.to_record());
            if let Err(e) = self.complete_with_retry(&task.token, delta, vec![fail]).await {
                warn!(workflow_id = %info.workflow_id, error = %e, "failed to record unregistered workflow");
            }
            return;
        };

        match self.run_task(handler, &task) {
            Ok((delta, commands)) => {
                if let Err(e) = self.complete_with_retry(&task.token, delta, commands).await {
                    warn!(workflow_id = %info.workflow_id, error = %e, "complete_task failed");
                }
            }
            Err(nd) => {
                error!(
                    workflow_id = %nd.workflow_id,
                    event_index = nd.event_index,
                    error = %nd.message,
                    "nondeterministic replay; failing workflow"
                );
                if let Err(e) = self.backend.fail_task(&task.token, nd.into()).await {
                    warn!(workflow_id = %info.workflow_id, error = %e, "fail_task failed");
                }
            }
        }
    }

    /// Replay history, then feed new events live. Each new event is followed in the
    /// delta by the records of the commands it produced.
    fn run_task(
        &self,
        handler: Arc<dyn WorkflowHandler>,
        task: &WorkflowTask,
    ) -> Result<(Vec<Event>, Vec<Command>), NondeterminismError> {
        let mut ctx = execution::replay(
            task.info.clone(),
            handler,
            Arc::clone(&self.converter),
            &task.history,
        )?;

        let mut delta = Vec::with_capacity(task.new_events.len());
        let mut commands = Vec::new();
        for event in task.new_events.iter().cloned() {
            delta.push(event.clone());
            let step = ctx.run_step(event)?;
            for command in step.commands {
                delta.push(command.to_record());
                commands.push(command);
            }
        }
        Ok((delta, commands))
    }

    async fn complete_with_retry(
        &self,
        token: &str,
        delta: Vec<Event>,
        commands: Vec<Command>,
    ) -> Result<(), BackendError> {
        let mut attempts: u32 = 0;
        loop {
            match self
                .backend
                .complete_task(token, delta.clone(), commands.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts < self.options.max_ack_attempts => {
                    let backoff_ms = 10u64.saturating_mul(1 << attempts.min(16));
                    warn!(attempts, backoff_ms, error = %e, "complete_task failed; retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempts += 1;
                }
                Err(e) => {
                    warn!(attempts, error = %e, "complete_task failed after max retries; abandoning task");
                    if let Err(abandon) = self.backend.abandon_task(token).await {
                        warn!(error = %abandon, "abandon_task failed; lease stays outstanding");
                    }
                    return Err(e);
                }
            }
        }
    }
}
