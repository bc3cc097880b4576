use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::debug;

use super::{Backend, BackendError, StartWorkflowRequest, WorkflowExecution, WorkflowStatus, WorkflowTask};
use crate::errors::WorkflowError;
use crate::{Command, Event, WorkflowInfo};

struct ParentLink {
    workflow_id: String,
    seq: u64,
}

struct Instance {
    info: WorkflowInfo,
    parent: Option<ParentLink>,
    history: Vec<Event>,
    /// Events not yet handed to a worker.
    pending: VecDeque<Event>,
    /// Events handed out with the outstanding task.
    in_flight: Vec<Event>,
    queued: bool,
    lease: Option<String>,
    status: watch::Sender<WorkflowStatus>,
}

impl Instance {
    fn is_open(&self) -> bool {
        !self.status.borrow().is_terminal()
    }
}

/// Deferred effects of a completed task that need the runtime clock.
enum Effect {
    Timer {
        workflow_id: String,
        seq: u64,
        after: Duration,
    },
    Timeout {
        workflow_id: String,
        after: Duration,
    },
}

#[derive(Default)]
struct State {
    instances: HashMap<String, Instance>,
    /// Ready instance ids per task queue.
    ready: HashMap<String, VecDeque<String>>,
    /// Task token to workflow id.
    leases: HashMap<String, String>,
    next_token: u64,
}

impl State {
    fn create_instance(&mut self, info: WorkflowInfo, parent: Option<ParentLink>, input: String) {
        let (status, _) = watch::channel(WorkflowStatus::Running);
        let started = Event::WorkflowExecutionStarted {
            workflow_type: info.workflow_type.clone(),
            method: info.method.clone(),
            input,
            parent_workflow_id: info.parent_workflow_id.clone(),
        };
        let workflow_id = info.workflow_id.clone();
        self.instances.insert(
            workflow_id.clone(),
            Instance {
                info,
                parent,
                history: Vec::new(),
                pending: VecDeque::from([started]),
                in_flight: Vec::new(),
                queued: false,
                lease: None,
                status,
            },
        );
        self.enqueue(&workflow_id);
    }

    fn enqueue(&mut self, workflow_id: &str) {
        let Some(inst) = self.instances.get_mut(workflow_id) else {
            return;
        };
        if inst.queued || inst.lease.is_some() || inst.pending.is_empty() || !inst.is_open() {
            return;
        }
        inst.queued = true;
        let queue = inst.info.task_queue.clone();
        self.ready.entry(queue).or_default().push_back(workflow_id.to_string());
    }

    /// Buffer `event` for the instance. Events for closed or unknown instances are dropped.
    fn deliver(&mut self, workflow_id: &str, event: Event) {
        match self.instances.get_mut(workflow_id) {
            Some(inst) if inst.is_open() => inst.pending.push_back(event),
            Some(_) => {
                debug!(workflow_id, event = event.kind_name(), "dropping event for closed workflow");
                return;
            }
            None => {
                debug!(workflow_id, event = event.kind_name(), "dropping event for unknown workflow");
                return;
            }
        }
        self.enqueue(workflow_id);
    }

    /// Close the instance, publish its status and report the outcome to its parent.
    fn close(&mut self, workflow_id: &str, status: WorkflowStatus) {
        let Some(inst) = self.instances.get_mut(workflow_id) else {
            return;
        };
        inst.pending.clear();
        inst.queued = false;
        inst.status.send_replace(status.clone());
        debug!(workflow_id, status = ?status, "workflow closed");

        let Some(parent) = &inst.parent else {
            return;
        };
        let seq = parent.seq;
        let parent_id = parent.workflow_id.clone();
        let event = match status {
            WorkflowStatus::Completed { result } => Event::ChildWorkflowCompleted { seq, result },
            WorkflowStatus::Failed { error } => Event::ChildWorkflowFailed { seq, cause: error },
            WorkflowStatus::Cancelled { reason } => Event::ChildWorkflowCancelled { seq, reason },
            WorkflowStatus::TimedOut => Event::ChildWorkflowTimedOut { seq },
            WorkflowStatus::Running => return,
        };
        self.deliver(&parent_id, event);
    }

    fn time_out(&mut self, workflow_id: &str) {
        match self.instances.get_mut(workflow_id) {
            Some(inst) if inst.is_open() => inst.history.push(Event::WorkflowTimedOut),
            _ => return,
        }
        self.close(workflow_id, WorkflowStatus::TimedOut);
    }

    fn release(&mut self, operation: &str, token: &str) -> Result<String, BackendError> {
        let workflow_id = self
            .leases
            .remove(token)
            .ok_or_else(|| BackendError::permanent(operation, format!("unknown task token {token}")))?;
        if let Some(inst) = self.instances.get_mut(&workflow_id) {
            inst.lease = None;
        }
        Ok(workflow_id)
    }

    fn apply_command(&mut self, workflow_id: &str, command: Command, effects: &mut Vec<Effect>) {
        match command {
            Command::StartChildWorkflow {
                seq,
                workflow_type,
                method,
                workflow_id: child_id,
                task_queue,
                input,
                execution_timeout_ms,
                detached: _,
            } => {
                if self.instances.contains_key(&child_id) {
                    self.deliver(
                        workflow_id,
                        Event::ChildWorkflowStartFailed {
                            seq,
                            cause: WorkflowError::application(format!("workflow id {child_id} already exists")),
                        },
                    );
                    return;
                }
                let run_id = uuid::Uuid::new_v4().to_string();
                let info = WorkflowInfo {
                    workflow_type,
                    method,
                    workflow_id: child_id.clone(),
                    run_id: run_id.clone(),
                    task_queue,
                    parent_workflow_id: Some(workflow_id.to_string()),
                };
                let parent = ParentLink {
                    workflow_id: workflow_id.to_string(),
                    seq,
                };
                self.create_instance(info, Some(parent), input);
                self.deliver(workflow_id, Event::ChildWorkflowStarted { seq, run_id });
                if let Some(ms) = execution_timeout_ms {
                    effects.push(Effect::Timeout {
                        workflow_id: child_id,
                        after: Duration::from_millis(ms),
                    });
                }
            }
            Command::RequestCancelChild { seq, workflow_id: child_id } => {
                let is_own_child = self
                    .instances
                    .get(&child_id)
                    .and_then(|child| child.parent.as_ref())
                    .is_some_and(|link| link.workflow_id == workflow_id && link.seq == seq);
                if !is_own_child {
                    debug!(workflow_id, child = %child_id, seq, "dropping cancel for workflow that is not this child");
                    return;
                }
                self.deliver(
                    &child_id,
                    Event::WorkflowCancelRequested {
                        reason: format!("parent {workflow_id} cancelled"),
                    },
                );
            }
            Command::StartTimer { seq, delay_ms } => effects.push(Effect::Timer {
                workflow_id: workflow_id.to_string(),
                seq,
                after: Duration::from_millis(delay_ms),
            }),
            Command::CompleteWorkflow { result } => self.close(workflow_id, WorkflowStatus::Completed { result }),
            Command::FailWorkflow { error } => self.close(workflow_id, WorkflowStatus::Failed { error }),
            Command::CancelWorkflow { reason } => self.close(workflow_id, WorkflowStatus::Cancelled { reason }),
        }
    }
}

/// Process-local backend. Children are parented by workflow id; completing a parent
/// leaves its still-running children alone.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every instance ever started, sorted.
    pub async fn workflow_ids(&self) -> Vec<String> {
        let st = self.state.lock().await;
        let mut ids: Vec<String> = st.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn spawn_effect(&self, effect: Effect) {
        let state = Arc::clone(&self.state);
        match effect {
            Effect::Timer {
                workflow_id,
                seq,
                after,
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    state.lock().await.deliver(&workflow_id, Event::TimerFired { seq });
                });
            }
            Effect::Timeout { workflow_id, after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    state.lock().await.time_out(&workflow_id);
                });
            }
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<WorkflowExecution, BackendError> {
        let workflow_id = request
            .workflow_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let run_id = uuid::Uuid::new_v4().to_string();
        {
            let mut st = self.state.lock().await;
            if st.instances.contains_key(&workflow_id) {
                return Err(BackendError::permanent(
                    "start_workflow",
                    format!("workflow id {workflow_id} already exists"),
                ));
            }
            let info = WorkflowInfo {
                workflow_type: request.workflow_type,
                method: request.method,
                workflow_id: workflow_id.clone(),
                run_id: run_id.clone(),
                task_queue: request.task_queue,
                parent_workflow_id: None,
            };
            st.create_instance(info, None, request.input);
        }
        if let Some(after) = request.execution_timeout {
            self.spawn_effect(Effect::Timeout {
                workflow_id: workflow_id.clone(),
                after,
            });
        }
        Ok(WorkflowExecution { workflow_id, run_id })
    }

    async fn dispatch_task(&self, task_queue: &str) -> Result<Option<WorkflowTask>, BackendError> {
        let mut st = self.state.lock().await;
        loop {
            let Some(workflow_id) = st.ready.get_mut(task_queue).and_then(|q| q.pop_front()) else {
                return Ok(None);
            };
            st.next_token += 1;
            let token = format!("task:{}", st.next_token);
            let Some(inst) = st.instances.get_mut(&workflow_id) else {
                continue;
            };
            if !inst.queued || !inst.is_open() {
                inst.queued = false;
                continue;
            }
            inst.queued = false;
            inst.lease = Some(token.clone());
            inst.in_flight = inst.pending.drain(..).collect();
            let task = WorkflowTask {
                token: token.clone(),
                info: inst.info.clone(),
                history: inst.history.clone(),
                new_events: inst.in_flight.clone(),
            };
            st.leases.insert(token, workflow_id);
            return Ok(Some(task));
        }
    }

    async fn complete_task(
        &self,
        token: &str,
        history_delta: Vec<Event>,
        commands: Vec<Command>,
    ) -> Result<(), BackendError> {
        let mut effects = Vec::new();
        {
            let mut st = self.state.lock().await;
            let workflow_id = st.release("complete_task", token)?;
            let Some(inst) = st.instances.get_mut(&workflow_id) else {
                return Err(BackendError::permanent(
                    "complete_task",
                    format!("unknown workflow {workflow_id}"),
                ));
            };
            inst.in_flight.clear();
            if !inst.is_open() {
                debug!(workflow_id, "discarding task result for closed workflow");
                return Ok(());
            }
            inst.history.extend(history_delta);
            for command in commands {
                st.apply_command(&workflow_id, command, &mut effects);
            }
            st.enqueue(&workflow_id);
        }
        for effect in effects {
            self.spawn_effect(effect);
        }
        Ok(())
    }

    async fn fail_task(&self, token: &str, error: WorkflowError) -> Result<(), BackendError> {
        let mut st = self.state.lock().await;
        let workflow_id = st.release("fail_task", token)?;
        let Some(inst) = st.instances.get_mut(&workflow_id) else {
            return Ok(());
        };
        inst.in_flight.clear();
        if !inst.is_open() {
            return Ok(());
        }
        inst.history.push(Event::WorkflowFailed { error: error.clone() });
        st.close(&workflow_id, WorkflowStatus::Failed { error });
        Ok(())
    }

    async fn abandon_task(&self, token: &str) -> Result<(), BackendError> {
        let mut st = self.state.lock().await;
        let workflow_id = st.release("abandon_task", token)?;
        if let Some(inst) = st.instances.get_mut(&workflow_id) {
            for event in inst.in_flight.drain(..).rev() {
                inst.pending.push_front(event);
            }
        }
        st.enqueue(&workflow_id);
        Ok(())
    }

    async fn cancel_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), BackendError> {
        let mut st = self.state.lock().await;
        if !st.instances.contains_key(workflow_id) {
            return Err(BackendError::permanent(
                "cancel_workflow",
                format!("unknown workflow {workflow_id}"),
            ));
        }
        st.deliver(
            workflow_id,
            Event::WorkflowCancelRequested {
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    async fn describe(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>, BackendError> {
        let st = self.state.lock().await;
        Ok(st.instances.get(workflow_id).map(|i| i.status.borrow().clone()))
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<Event>, BackendError> {
        let st = self.state.lock().await;
        st.instances
            .get(workflow_id)
            .map(|i| i.history.clone())
            .ok_or_else(|| BackendError::permanent("history", format!("unknown workflow {workflow_id}")))
    }

    async fn wait_for_completion(&self, workflow_id: &str) -> Result<WorkflowStatus, BackendError> {
        let mut rx = {
            let st = self.state.lock().await;
            st.instances
                .get(workflow_id)
                .map(|i| i.status.subscribe())
                .ok_or_else(|| {
                    BackendError::permanent("wait_for_completion", format!("unknown workflow {workflow_id}"))
                })?
        };
        let status = rx
            .wait_for(WorkflowStatus::is_terminal)
            .await
            .map_err(|e| BackendError::permanent("wait_for_completion", e.to_string()))?
            .clone();
        Ok(status)
    }
}
