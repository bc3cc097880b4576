//! Deterministic child-workflow orchestration with async invocation.
//!
//! Workflow code is ordinary `async` Rust driven by a cooperative, single-threaded
//! scheduler per instance. Every side effect a workflow wants (starting a child
//! workflow, starting a timer, finishing) is expressed as a [`Command`]; the backend
//! records commands and answers with [`Event`]s. Replaying the recorded events through
//! the same code must reproduce the same commands, otherwise replay fails with
//! [`NondeterminismError`].
//!
//! The crate exposes:
//!
//! - Data model: [`Event`], [`Command`], [`WorkflowInfo`]
//! - [`WorkflowContext`]: child stubs, async invocation, timers and logical threads
//! - [`stub`]: declared workflow interfaces, child stubs and eligible method references
//! - [`runtime`]: the scheduler, child lifecycle manager, `run_step` and the worker
//! - [`backend`], [`client`] and [`testing`]: the in-process harness
//!
//! ```rust,no_run
//! use durochild::stub::{ChildWorkflowOptions, WorkflowInterface, invoke_async};
//! use durochild::{WorkflowContext, WorkflowError};
//!
//! async fn parent(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
//!     let child_iface = WorkflowInterface::builder("Child").workflow_method("execute").build();
//!     let child = ctx.new_child_stub(&child_iface, ChildWorkflowOptions::default());
//!     let execute = child.method("execute");
//!     let pending = invoke_async(&execute, &())?;
//!     // ... other work while the child runs ...
//!     pending.await
//! }
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod backend;
pub mod client;
pub mod converter;
pub mod errors;
pub mod futures;
pub mod logging;
pub mod runtime;
pub mod stub;
pub mod testing;

pub use client::{ClientError, ClientWorkflowStub, WorkflowClient, WorkflowOptions};
pub use errors::{IneligibleReferenceError, NondeterminismError, RegistryError, WorkflowError};
pub use futures::{AsyncFuture, TypedFuture};
pub use runtime::execution::{ExecutionContext, StepOutcome, run_step};
pub use runtime::{WorkflowHandler, WorkflowImplementation, Worker, WorkerOptions};
pub use stub::{ChildWorkflowOptions, Eligibility, MethodRef, WorkflowInterface, WorkflowStub, invoke_async};

use crate::runtime::execution::{ContextState, lock_state};

/// Identity of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    /// Interface name the implementation is registered under.
    pub workflow_type: String,
    /// Workflow method the execution entered through.
    pub method: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_queue: String,
    pub parent_workflow_id: Option<String>,
}

/// Append-only history entries. Input events drive the workflow forward; command
/// records are the backend's copy of commands the workflow issued and are matched
/// against re-issued commands during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// First event of every execution.
    WorkflowExecutionStarted {
        workflow_type: String,
        method: String,
        input: String,
        parent_workflow_id: Option<String>,
    },

    /// Record of `Command::StartChildWorkflow`.
    ChildWorkflowInitiated {
        seq: u64,
        workflow_type: String,
        method: String,
        workflow_id: String,
        task_queue: String,
        input: String,
        execution_timeout_ms: Option<u64>,
        detached: bool,
    },
    /// Backend acknowledged the child start.
    ChildWorkflowStarted { seq: u64, run_id: String },
    /// Backend refused to start the child.
    ChildWorkflowStartFailed { seq: u64, cause: WorkflowError },
    ChildWorkflowCompleted { seq: u64, result: String },
    ChildWorkflowFailed { seq: u64, cause: WorkflowError },
    ChildWorkflowCancelled { seq: u64, reason: String },
    ChildWorkflowTimedOut { seq: u64 },
    /// Record of `Command::RequestCancelChild`.
    ChildCancelRequested { seq: u64, workflow_id: String },

    /// Record of `Command::StartTimer`.
    TimerStarted { seq: u64, delay_ms: u64 },
    TimerFired { seq: u64 },

    /// Cancellation was requested for this workflow.
    WorkflowCancelRequested { reason: String },

    /// Record of `Command::CompleteWorkflow`.
    WorkflowCompleted { result: String },
    /// Record of `Command::FailWorkflow`, or written by the backend when a task fails.
    WorkflowFailed { error: WorkflowError },
    /// Record of `Command::CancelWorkflow`.
    WorkflowCancelled { reason: String },
    /// Written by the backend when the execution timeout elapsed.
    WorkflowTimedOut,
}

impl Event {
    /// True for events that mirror a command issued by workflow code.
    pub fn is_command_record(&self) -> bool {
        matches!(
            self,
            Event::ChildWorkflowInitiated { .. }
                | Event::ChildCancelRequested { .. }
                | Event::TimerStarted { .. }
                | Event::WorkflowCompleted { .. }
                | Event::WorkflowFailed { .. }
                | Event::WorkflowCancelled { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            Event::ChildWorkflowInitiated { .. } => "ChildWorkflowInitiated",
            Event::ChildWorkflowStarted { .. } => "ChildWorkflowStarted",
            Event::ChildWorkflowStartFailed { .. } => "ChildWorkflowStartFailed",
            Event::ChildWorkflowCompleted { .. } => "ChildWorkflowCompleted",
            Event::ChildWorkflowFailed { .. } => "ChildWorkflowFailed",
            Event::ChildWorkflowCancelled { .. } => "ChildWorkflowCancelled",
            Event::ChildWorkflowTimedOut { .. } => "ChildWorkflowTimedOut",
            Event::ChildCancelRequested { .. } => "ChildCancelRequested",
            Event::TimerStarted { .. } => "TimerStarted",
            Event::TimerFired { .. } => "TimerFired",
            Event::WorkflowCancelRequested { .. } => "WorkflowCancelRequested",
            Event::WorkflowCompleted { .. } => "WorkflowCompleted",
            Event::WorkflowFailed { .. } => "WorkflowFailed",
            Event::WorkflowCancelled { .. } => "WorkflowCancelled",
            Event::WorkflowTimedOut => "WorkflowTimedOut",
        }
    }
}

/// Decisions produced by a workflow step, in the order the code issued them. The
/// backend applies them in exactly that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    StartChildWorkflow {
        seq: u64,
        workflow_type: String,
        method: String,
        workflow_id: String,
        task_queue: String,
        input: String,
        execution_timeout_ms: Option<u64>,
        detached: bool,
    },
    RequestCancelChild { seq: u64, workflow_id: String },
    StartTimer { seq: u64, delay_ms: u64 },
    CompleteWorkflow { result: String },
    FailWorkflow { error: WorkflowError },
    CancelWorkflow { reason: String },
}

impl Command {
    /// The history event the backend records for this command.
    pub fn to_record(&self) -> Event {
        match self {
            Command::StartChildWorkflow {
                seq,
                workflow_type,
                method,
                workflow_id,
                task_queue,
                input,
                execution_timeout_ms,
                detached,
            } => Event::ChildWorkflowInitiated {
                seq: *seq,
                workflow_type: workflow_type.clone(),
                method: method.clone(),
                workflow_id: workflow_id.clone(),
                task_queue: task_queue.clone(),
                input: input.clone(),
                execution_timeout_ms: *execution_timeout_ms,
                detached: *detached,
            },
            Command::RequestCancelChild { seq, workflow_id } => Event::ChildCancelRequested {
                seq: *seq,
                workflow_id: workflow_id.clone(),
            },
            Command::StartTimer { seq, delay_ms } => Event::TimerStarted {
                seq: *seq,
                delay_ms: *delay_ms,
            },
            Command::CompleteWorkflow { result } => Event::WorkflowCompleted { result: result.clone() },
            Command::FailWorkflow { error } => Event::WorkflowFailed { error: error.clone() },
            Command::CancelWorkflow { reason } => Event::WorkflowCancelled { reason: reason.clone() },
        }
    }

    pub fn matches_record(&self, record: &Event) -> bool {
        self.to_record() == *record
    }
}

/// Handle passed to workflow code. Cloning is cheap; all clones share the execution
/// context of one workflow instance.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) state: Arc<Mutex<ContextState>>,
}

impl WorkflowContext {
    pub(crate) fn from_state(state: Arc<Mutex<ContextState>>) -> Self {
        Self { state }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextState> {
        lock_state(&self.state)
    }

    pub fn info(&self) -> WorkflowInfo {
        self.lock().info.clone()
    }

    pub fn workflow_id(&self) -> String {
        self.lock().info.workflow_id.clone()
    }

    /// True while recorded history is being re-applied.
    pub fn is_replaying(&self) -> bool {
        self.lock().replaying
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_reason.is_some()
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.lock().cancel_reason.clone()
    }

    /// Create a stub for starting children that implement `interface`.
    pub fn new_child_stub(&self, interface: &WorkflowInterface, options: ChildWorkflowOptions) -> WorkflowStub {
        WorkflowStub::new(self.clone(), interface.clone(), options)
    }

    /// Start the child behind `method` without suspending the caller.
    ///
    /// Same as [`invoke_async`]; fails with [`IneligibleReferenceError`] before any
    /// command is issued when `method` did not come from a [`WorkflowStub`].
    pub fn invoke_async<A: Serialize + ?Sized>(
        &self,
        method: &MethodRef,
        args: &A,
    ) -> Result<AsyncFuture, IneligibleReferenceError> {
        invoke_async(method, args)
    }

    /// Start a durable timer. The returned future resolves when the backend fires it.
    pub fn timer(&self, delay: Duration) -> AsyncFuture {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let mut st = self.lock();
        let seq = st.next_seq();
        let future = st.futures.create();
        st.register_timer(seq, future);
        st.issue(Command::StartTimer { seq, delay_ms });
        drop(st);
        AsyncFuture::new(future, futures::FutureKind::Timer { seq }, self.clone())
    }

    pub async fn sleep(&self, delay: Duration) {
        let _ = self.timer(delay).await;
    }

    /// Run `fut` as a new logical thread of this instance. It starts running the next
    /// time the current thread yields.
    pub fn spawn<F>(&self, fut: F) -> AsyncFuture
    where
        F: Future<Output = Result<String, WorkflowError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let mut st = self.lock();
        let future = st.futures.create();
        st.spawn_thread(Box::pin(async move {
            let result = fut.await;
            lock_state(&state).futures.resolve(future, result);
        }));
        drop(st);
        AsyncFuture::new(future, futures::FutureKind::Thread, self.clone())
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, WorkflowError> {
        let conv = Arc::clone(&self.lock().converter);
        Ok(converter::encode(conv.as_ref(), value)?)
    }

    pub fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, WorkflowError> {
        let conv = Arc::clone(&self.lock().converter);
        Ok(converter::decode(conv.as_ref(), payload)?)
    }

    /// Register a child in `Starting` state and issue its start command.
    pub(crate) fn start_child(
        &self,
        interface: &WorkflowInterface,
        method: &str,
        options: &ChildWorkflowOptions,
        input: String,
    ) -> AsyncFuture {
        let mut st = self.lock();
        let seq = st.next_seq();
        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| format!("{}::{seq}", st.info.workflow_id));
        let task_queue = options
            .task_queue
            .clone()
            .unwrap_or_else(|| st.info.task_queue.clone());
        let future = st.futures.create();
        st.children.register(runtime::children::ChildWorkflowExecution::new(
            seq,
            interface.name(),
            method,
            &workflow_id,
            future,
            options.detached,
        ));
        st.issue(Command::StartChildWorkflow {
            seq,
            workflow_type: interface.name().to_string(),
            method: method.to_string(),
            workflow_id,
            task_queue,
            input,
            execution_timeout_ms: options
                .execution_timeout
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            detached: options.detached,
        });
        drop(st);
        AsyncFuture::new(future, futures::FutureKind::Child { seq }, self.clone())
    }
}
