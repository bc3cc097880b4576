use super::helpers::*;
use durochild::{
    ChildWorkflowOptions, Command, Event, WorkflowContext, WorkflowError, WorkflowHandler, invoke_async, run_step,
};
use std::sync::Arc;

async fn one_child(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
    invoke_async(&child_stub(&ctx).method("execute"), &())?.await
}

async fn no_children(_ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
    Ok("done".into())
}

#[test]
fn record_that_differs_from_issued_command() {
    let mut ctx = create_ctx(handler(one_child));
    ctx.set_replaying(true);
    run_step(&mut ctx, started("null")).unwrap();

    let recorded_other_child = Event::ChildWorkflowInitiated {
        seq: 1,
        workflow_type: "SomeOtherChild".into(),
        method: "execute".into(),
        workflow_id: "wf::1".into(),
        task_queue: QUEUE.into(),
        input: "null".into(),
        execution_timeout_ms: None,
        detached: false,
    };
    let err = run_step(&mut ctx, recorded_other_child).unwrap_err();
    assert_eq!(err.workflow_id, WF_ID);
    assert_eq!(err.event_index, 1);
    assert!(err.message.contains("SomeOtherChild"), "{}", err.message);
}

#[test]
fn record_with_no_pending_command() {
    let mut ctx = create_ctx(handler(no_children));
    ctx.set_replaying(true);
    run_step(&mut ctx, started("null")).unwrap();
    run_step(&mut ctx, Command::CompleteWorkflow { result: "done".into() }.to_record()).unwrap();

    let err = run_step(&mut ctx, start_child(1).to_record()).unwrap_err();
    assert!(err.message.contains("issued no matching command"), "{}", err.message);
}

#[test]
fn input_event_while_commands_are_unconfirmed() {
    let mut ctx = create_ctx(handler(one_child));
    ctx.set_replaying(true);
    run_step(&mut ctx, started("null")).unwrap();

    let err = run_step(&mut ctx, child_started(1)).unwrap_err();
    assert!(err.message.contains("history continues with ChildWorkflowStarted"), "{}", err.message);
}

#[test]
fn replay_ending_with_unrecorded_commands() {
    let mut ctx = create_ctx(handler(one_child));
    ctx.set_replaying(true);
    run_step(&mut ctx, started("null")).unwrap();
    let err = ctx.finish_replay().unwrap_err();
    assert!(err.message.contains("never recorded"), "{}", err.message);
}

#[test]
fn code_that_stops_issuing_a_recorded_command() {
    // History was recorded by a version that started a child; this version does not.
    let history = vec![started("null"), start_child(1).to_record()];
    let mut ctx = create_ctx(handler(no_children));
    ctx.set_replaying(true);
    run_step(&mut ctx, history[0].clone()).unwrap();
    let err = run_step(&mut ctx, history[1].clone()).unwrap_err();
    assert!(err.message.contains("CompleteWorkflow"), "{}", err.message);
}

#[test]
fn nondeterminism_converts_to_workflow_error() {
    let mut ctx = create_ctx(handler(one_child));
    ctx.set_replaying(true);
    run_step(&mut ctx, started("null")).unwrap();
    let err = ctx.finish_replay().unwrap_err();
    let wf: WorkflowError = err.clone().into();
    assert_eq!(wf, WorkflowError::Nondeterminism { message: err.message });
}

#[test]
fn child_options_are_part_of_the_recorded_command() {
    fn routed(task_queue: &'static str, detached: bool) -> Arc<dyn WorkflowHandler> {
        handler(move |ctx: WorkflowContext, _input: String| async move {
            let stub = ctx.new_child_stub(
                &child_iface(),
                ChildWorkflowOptions {
                    task_queue: Some(task_queue.into()),
                    detached,
                    ..Default::default()
                },
            );
            let out = invoke_async(&stub.method("execute"), &())?.await?;
            Ok::<String, WorkflowError>(out)
        })
    }

    let recorded = vec![started("null")];
    let mut live = create_ctx(routed("queue-a", false));
    let mut history = recorded.clone();
    for command in execute(&mut live, recorded) {
        history.push(command.to_record());
    }
    assert!(matches!(
        &history[1],
        Event::ChildWorkflowInitiated { task_queue, detached: false, .. } if task_queue == "queue-a"
    ));

    let replay = |task_queue, detached| {
        durochild::runtime::execution::replay(
            info(),
            routed(task_queue, detached),
            durochild::converter::default_converter(),
            &history,
        )
    };
    assert!(replay("queue-a", false).is_ok());
    let err = replay("queue-b", false).err().expect("changed task queue must diverge");
    assert!(err.message.contains("queue-b"), "{}", err.message);
    assert!(replay("queue-a", true).is_err(), "flipping detached must diverge");
}
