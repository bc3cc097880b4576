//! Event builders, handler wrappers and a scripted backend for replay step tests.

use durochild::converter::default_converter;
use durochild::runtime::FnWorkflow;
use durochild::{
    ChildWorkflowOptions, Command, Event, ExecutionContext, WorkflowContext, WorkflowError, WorkflowHandler,
    WorkflowInfo, WorkflowInterface, WorkflowStub, run_step,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

pub const WF_ID: &str = "wf";
pub const QUEUE: &str = "q";

pub fn info() -> WorkflowInfo {
    WorkflowInfo {
        workflow_type: "Parent".to_string(),
        method: "execute".to_string(),
        workflow_id: WF_ID.to_string(),
        run_id: "run-1".to_string(),
        task_queue: QUEUE.to_string(),
        parent_workflow_id: None,
    }
}

pub fn handler<F, Fut>(f: F) -> Arc<dyn WorkflowHandler>
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, WorkflowError>> + Send + 'static,
{
    Arc::new(FnWorkflow(f))
}

pub fn create_ctx(h: Arc<dyn WorkflowHandler>) -> ExecutionContext {
    ExecutionContext::new(info(), h, default_converter())
}

pub fn child_iface() -> WorkflowInterface {
    WorkflowInterface::builder("Child").workflow_method("execute").build()
}

pub fn child_stub(ctx: &WorkflowContext) -> WorkflowStub {
    ctx.new_child_stub(&child_iface(), ChildWorkflowOptions::default())
}

pub fn started(input: &str) -> Event {
    Event::WorkflowExecutionStarted {
        workflow_type: "Parent".to_string(),
        method: "execute".to_string(),
        input: input.to_string(),
        parent_workflow_id: None,
    }
}

/// The default start command for child `seq` with a `null` argument.
pub fn start_child(seq: u64) -> Command {
    start_child_with_input(seq, "null")
}

pub fn start_child_with_input(seq: u64, input: &str) -> Command {
    Command::StartChildWorkflow {
        seq,
        workflow_type: "Child".to_string(),
        method: "execute".to_string(),
        workflow_id: format!("{WF_ID}::{seq}"),
        task_queue: QUEUE.to_string(),
        input: input.to_string(),
        execution_timeout_ms: None,
        detached: false,
    }
}

pub fn child_started(seq: u64) -> Event {
    Event::ChildWorkflowStarted {
        seq,
        run_id: format!("run-child-{seq}"),
    }
}

pub fn child_completed(seq: u64, result: &str) -> Event {
    Event::ChildWorkflowCompleted {
        seq,
        result: result.to_string(),
    }
}

pub fn cancel_requested(reason: &str) -> Event {
    Event::WorkflowCancelRequested {
        reason: reason.to_string(),
    }
}

/// Apply `events` in order and return all commands issued, panicking on error.
pub fn execute(ctx: &mut ExecutionContext, events: Vec<Event>) -> Vec<Command> {
    let mut commands = Vec::new();
    for event in events {
        let out = run_step(ctx, event).expect("step should succeed");
        commands.extend(out.commands);
    }
    commands
}

/// Run a workflow to completion against a backend that starts every child and
/// completes it with `result_for(seq)`. Returns the recorded history, shaped like a
/// worker's task delta: each event followed by the records of its commands.
pub fn record_history(h: Arc<dyn WorkflowHandler>, input: &str, result_for: impl Fn(u64) -> String) -> Vec<Event> {
    let mut ctx = create_ctx(h);
    let mut inbox = VecDeque::from([started(input)]);
    let mut history = Vec::new();
    while let Some(event) = inbox.pop_front() {
        history.push(event.clone());
        let out = run_step(&mut ctx, event).expect("live step should succeed");
        for command in out.commands {
            history.push(command.to_record());
            if let Command::StartChildWorkflow { seq, .. } = command {
                inbox.push_back(child_started(seq));
                inbox.push_back(child_completed(seq, &result_for(seq)));
            }
        }
        if out.is_complete {
            break;
        }
    }
    history
}

pub fn assert_completed(commands: &[Command], expected: &str) {
    match commands.last() {
        Some(Command::CompleteWorkflow { result }) => assert_eq!(result, expected),
        other => panic!("expected CompleteWorkflow({expected}), got {other:?}"),
    }
}

pub fn assert_failed_with(commands: &[Command], pred: impl Fn(&WorkflowError) -> bool) {
    match commands.last() {
        Some(Command::FailWorkflow { error }) => assert!(pred(error), "unexpected failure {error:?}"),
        other => panic!("expected FailWorkflow, got {other:?}"),
    }
}
