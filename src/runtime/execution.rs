//! Execution context of one workflow instance and the single-event replay step.
//!
//! `run_step` applies one history event, runs logical threads until none is
//! runnable, and returns the commands issued during that step. While replaying, every
//! issued command is held as unconfirmed until the matching command-record event
//! arrives; any divergence is a [`NondeterminismError`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::converter::DataConverter;
use crate::errors::{NondeterminismError, WorkflowError};
use crate::futures::{FutureId, FutureTable};
use crate::runtime::WorkflowHandler;
use crate::runtime::children::{ChildLifecycleManager, ChildTransition, ChildWorkflowExecution};
use crate::runtime::scheduler::{DeterministicScheduler, ThreadFuture};
use crate::{Command, Event, WorkflowContext, WorkflowInfo};

/// State shared between the execution context and every [`WorkflowContext`] clone.
pub(crate) struct ContextState {
    pub(crate) info: WorkflowInfo,
    pub(crate) converter: Arc<dyn DataConverter>,
    pub(crate) children: ChildLifecycleManager,
    pub(crate) futures: FutureTable,
    pub(crate) replaying: bool,
    pub(crate) cancel_reason: Option<String>,
    next_seq: u64,
    commands: Vec<Command>,
    timers: BTreeMap<u64, FutureId>,
    spawned: Vec<ThreadFuture>,
    main_result: Option<Result<String, WorkflowError>>,
}

impl ContextState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn issue(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub(crate) fn register_timer(&mut self, seq: u64, future: FutureId) {
        self.timers.insert(seq, future);
    }

    pub(crate) fn spawn_thread(&mut self, thread: ThreadFuture) {
        self.spawned.push(thread);
    }
}

pub(crate) fn lock_state(state: &Mutex<ContextState>) -> MutexGuard<'_, ContextState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Commands issued while applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub commands: Vec<Command>,
    pub is_complete: bool,
}

pub struct ExecutionContext {
    workflow_id: String,
    ctx: WorkflowContext,
    handler: Arc<dyn WorkflowHandler>,
    scheduler: DeterministicScheduler,
    unconfirmed: VecDeque<Command>,
    issued: Vec<Command>,
    events_applied: usize,
    started: bool,
    complete: bool,
}

impl ExecutionContext {
    pub fn new(info: WorkflowInfo, handler: Arc<dyn WorkflowHandler>, converter: Arc<dyn DataConverter>) -> Self {
        let workflow_id = info.workflow_id.clone();
        let state = ContextState {
            info,
            converter,
            children: ChildLifecycleManager::default(),
            futures: FutureTable::default(),
            replaying: false,
            cancel_reason: None,
            next_seq: 0,
            commands: Vec::new(),
            timers: BTreeMap::new(),
            spawned: Vec::new(),
            main_result: None,
        };
        Self {
            workflow_id,
            ctx: WorkflowContext::from_state(Arc::new(Mutex::new(state))),
            handler,
            scheduler: DeterministicScheduler::new(),
            unconfirmed: VecDeque::new(),
            issued: Vec::new(),
            events_applied: 0,
            started: false,
            complete: false,
        }
    }

    pub fn workflow_context(&self) -> WorkflowContext {
        self.ctx.clone()
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.ctx.lock().replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.ctx.lock().replaying
    }

    /// Leave replay mode. Fails if code issued commands that history never recorded.
    pub fn finish_replay(&mut self) -> Result<(), NondeterminismError> {
        if let Some(cmd) = self.unconfirmed.front() {
            return Err(self.nondeterminism(format!(
                "history ended but command {cmd:?} was never recorded"
            )));
        }
        self.set_replaying(false);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Every command issued so far, replayed and live, in issue order.
    pub fn issued_commands(&self) -> &[Command] {
        &self.issued
    }

    pub fn events_applied(&self) -> usize {
        self.events_applied
    }

    pub fn children(&self) -> Vec<ChildWorkflowExecution> {
        self.ctx.lock().children.iter().cloned().collect()
    }

    pub fn live_threads(&self) -> usize {
        self.scheduler.live_threads()
    }

    pub fn run_step(&mut self, event: Event) -> Result<StepOutcome, NondeterminismError> {
        self.events_applied += 1;

        if event.is_command_record() {
            self.confirm(&event)?;
            return Ok(self.outcome(Vec::new()));
        }
        if let Some(cmd) = self.unconfirmed.front() {
            return Err(self.nondeterminism(format!(
                "command {cmd:?} was issued but history continues with {}",
                event.kind_name()
            )));
        }
        if matches!(event, Event::WorkflowTimedOut) {
            self.complete = true;
            return Ok(self.outcome(Vec::new()));
        }
        if self.complete {
            return Ok(self.outcome(Vec::new()));
        }

        match event {
            Event::WorkflowExecutionStarted { input, .. } if !self.started => {
                self.started = true;
                self.start_main(input);
            }
            other if !self.started => {
                return Err(
                    self.nondeterminism(format!("{} before WorkflowExecutionStarted", other.kind_name()))
                );
            }
            other => self.apply_input(other)?,
        }

        self.run_threads();
        self.settle();

        let commands = std::mem::take(&mut self.ctx.lock().commands);
        self.issued.extend(commands.iter().cloned());
        if self.is_replaying() {
            self.unconfirmed.extend(commands.iter().cloned());
        }
        Ok(self.outcome(commands))
    }

    fn outcome(&self, commands: Vec<Command>) -> StepOutcome {
        StepOutcome {
            commands,
            is_complete: self.complete,
        }
    }

    fn nondeterminism(&self, message: impl Into<String>) -> NondeterminismError {
        NondeterminismError {
            workflow_id: self.workflow_id.clone(),
            event_index: self.events_applied.saturating_sub(1),
            message: message.into(),
        }
    }

    fn confirm(&mut self, record: &Event) -> Result<(), NondeterminismError> {
        let Some(expected) = self.unconfirmed.pop_front() else {
            return Err(self.nondeterminism(format!(
                "history records {record:?} but the workflow issued no matching command"
            )));
        };
        if !expected.matches_record(record) {
            return Err(self.nondeterminism(format!(
                "history records {record:?} but the workflow issued {expected:?}"
            )));
        }
        Ok(())
    }

    fn start_main(&mut self, input: String) {
        let ctx = self.ctx.clone();
        let handler = Arc::clone(&self.handler);
        let state = Arc::clone(&self.ctx.state);
        self.scheduler.spawn(Box::pin(async move {
            let result = handler.invoke(ctx, input).await;
            lock_state(&state).main_result = Some(result);
        }));
    }

    fn apply_input(&self, event: Event) -> Result<(), NondeterminismError> {
        let mut st = self.ctx.lock();
        let (seq, transition) = match event {
            Event::ChildWorkflowStarted { seq, run_id } => (seq, ChildTransition::Started { run_id }),
            Event::ChildWorkflowStartFailed { seq, cause } => (seq, ChildTransition::StartFailed { cause }),
            Event::ChildWorkflowCompleted { seq, result } => (seq, ChildTransition::Completed { result }),
            Event::ChildWorkflowFailed { seq, cause } => (seq, ChildTransition::Failed { cause }),
            Event::ChildWorkflowCancelled { seq, reason } => (seq, ChildTransition::Cancelled { reason }),
            Event::ChildWorkflowTimedOut { seq } => (seq, ChildTransition::TimedOut),
            Event::TimerFired { seq } => {
                let Some(future) = st.timers.remove(&seq) else {
                    return Err(self.nondeterminism(format!("TimerFired for unknown timer seq {seq}")));
                };
                st.futures.resolve(future, Ok(String::new()));
                return Ok(());
            }
            Event::WorkflowCancelRequested { reason } => {
                if st.cancel_reason.is_none() {
                    st.cancel_reason = Some(reason);
                }
                return Ok(());
            }
            other => {
                return Err(self.nondeterminism(format!("unexpected {}", other.kind_name())));
            }
        };

        match st.children.apply(seq, transition) {
            Ok(Some((future, outcome))) => {
                st.futures.resolve(future, outcome);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(self.nondeterminism(e.to_string())),
        }
    }

    fn run_threads(&mut self) {
        let state = Arc::clone(&self.ctx.state);
        let mut adopt = || std::mem::take(&mut lock_state(&state).spawned);
        if let Err(panic) = self.scheduler.run_until_blocked(&mut adopt) {
            lock_state(&state).main_result = Some(Err(WorkflowError::application(format!(
                "workflow thread {} panicked: {}",
                panic.thread.0, panic.message
            ))));
        }
    }

    /// Issue the terminal command once the instance can close.
    ///
    /// A returned value completes the workflow. Once cancellation is requested,
    /// attached pending children are asked to cancel and the workflow closes as
    /// cancelled after all of them are terminal. Otherwise a returned error fails it.
    fn settle(&mut self) {
        let mut st = self.ctx.lock();

        if let Some(Ok(result)) = &st.main_result {
            let result = result.clone();
            st.issue(Command::CompleteWorkflow { result });
            self.complete = true;
            return;
        }

        if let Some(reason) = st.cancel_reason.clone() {
            for (seq, workflow_id) in st.children.request_cancel_attached() {
                st.issue(Command::RequestCancelChild { seq, workflow_id });
            }
            if st.children.pending_attached().next().is_none() {
                st.issue(Command::CancelWorkflow { reason });
                self.complete = true;
            }
            return;
        }

        if let Some(Err(error)) = &st.main_result {
            let error = error.clone();
            st.issue(Command::FailWorkflow { error });
            self.complete = true;
        }
    }
}

/// Apply one event to `ctx`. See [`ExecutionContext::run_step`].
pub fn run_step(ctx: &mut ExecutionContext, event: Event) -> Result<StepOutcome, NondeterminismError> {
    ctx.run_step(event)
}

/// Rebuild an execution context from recorded history and leave it in live mode.
pub fn replay(
    info: WorkflowInfo,
    handler: Arc<dyn WorkflowHandler>,
    converter: Arc<dyn DataConverter>,
    history: &[Event],
) -> Result<ExecutionContext, NondeterminismError> {
    let mut ctx = ExecutionContext::new(info, handler, converter);
    ctx.set_replaying(!history.is_empty());
    for event in history {
        ctx.run_step(event.clone())?;
    }
    ctx.finish_replay()?;
    Ok(ctx)
}
