use super::helpers::*;
use durochild::runtime::children::ChildState;
use durochild::{ChildWorkflowOptions, Command, Event, WorkflowContext, WorkflowError, invoke_async, run_step};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn report_child_outcome(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
    match invoke_async(&child_stub(&ctx).method("execute"), &())?.await {
        Ok(v) => Ok(format!("ok {v}")),
        Err(WorkflowError::ChildWorkflowFailure { workflow_id, cause, .. }) => Ok(format!("failed {workflow_id}: {cause}")),
        Err(WorkflowError::ChildWorkflowTimeout { workflow_id, .. }) => Ok(format!("timed out {workflow_id}")),
        Err(WorkflowError::ChildWorkflowCancelled { reason, .. }) => Ok(format!("cancelled {reason}")),
        Err(other) => Err(other),
    }
}

#[test]
fn child_failure_reaches_the_awaiting_point() {
    let mut ctx = create_ctx(handler(report_child_outcome));
    let commands = execute(
        &mut ctx,
        vec![
            started("null"),
            child_started(1),
            Event::ChildWorkflowFailed {
                seq: 1,
                cause: WorkflowError::DataConversion {
                    message: "decode: missing field `count`".into(),
                },
            },
        ],
    );
    assert_completed(
        &commands,
        "failed wf::1: data conversion failed: decode: missing field `count`",
    );
    assert_eq!(ctx.children()[0].state, ChildState::Failed);
}

#[test]
fn child_timeout_surfaces_as_timeout_error() {
    let mut ctx = create_ctx(handler(report_child_outcome));
    let commands = execute(
        &mut ctx,
        vec![started("null"), child_started(1), Event::ChildWorkflowTimedOut { seq: 1 }],
    );
    assert_completed(&commands, "timed out wf::1");
    assert_eq!(ctx.children()[0].state, ChildState::TimedOut);
}

#[test]
fn rejected_start_fails_the_child_future() {
    let mut ctx = create_ctx(handler(report_child_outcome));
    let commands = execute(
        &mut ctx,
        vec![
            started("null"),
            Event::ChildWorkflowStartFailed {
                seq: 1,
                cause: WorkflowError::application("workflow id wf::1 already exists"),
            },
        ],
    );
    assert_completed(
        &commands,
        "failed wf::1: application failure: workflow id wf::1 already exists",
    );
}

#[test]
fn options_flow_into_the_start_command() {
    async fn with_options(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
        let stub = ctx.new_child_stub(
            &child_iface(),
            ChildWorkflowOptions {
                workflow_id: Some("custom-child".into()),
                task_queue: Some("other-queue".into()),
                execution_timeout: Some(Duration::from_secs(2)),
                detached: false,
            },
        );
        let _pending = invoke_async(&stub.method("execute"), &"payload")?;
        Ok("started".into())
    }

    let mut ctx = create_ctx(handler(with_options));
    let out = run_step(&mut ctx, started("null")).unwrap();
    assert_eq!(
        out.commands[0],
        Command::StartChildWorkflow {
            seq: 1,
            workflow_type: "Child".into(),
            method: "execute".into(),
            workflow_id: "custom-child".into(),
            task_queue: "other-queue".into(),
            input: "\"payload\"".into(),
            execution_timeout_ms: Some(2000),
            detached: false,
        }
    );
}

#[test]
fn fan_out_resolves_each_future_with_its_own_child() {
    async fn fan_out(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
        let stub = child_stub(&ctx);
        let method = stub.method("execute");
        let mut pending = Vec::new();
        for i in 0..3u32 {
            pending.push(invoke_async(&method, &i)?.typed::<u32>());
        }
        let values = futures::future::try_join_all(pending).await?;
        Ok(format!("{values:?}"))
    }

    let mut ctx = create_ctx(handler(fan_out));
    let first = run_step(&mut ctx, started("null")).unwrap();
    assert_eq!(
        first.commands,
        vec![
            start_child_with_input(1, "0"),
            start_child_with_input(2, "1"),
            start_child_with_input(3, "2")
        ]
    );

    // Completions arrive out of start order.
    let rest = execute(
        &mut ctx,
        vec![child_completed(3, "30"), child_completed(1, "10"), child_completed(2, "20")],
    );
    assert_completed(&rest, "[10, 20, 30]");
}

#[test]
fn several_threads_may_await_one_child() {
    async fn shared(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
        let pending = invoke_async(&child_stub(&ctx).method("execute"), &())?;
        let other = pending.clone();
        let watcher = ctx.spawn(async move { other.await.map(|v| format!("watcher saw {v}")) });
        let mine = pending.await?;
        let theirs = watcher.await?;
        Ok(format!("{mine} / {theirs}"))
    }

    let mut ctx = create_ctx(handler(shared));
    let commands = execute(&mut ctx, vec![started("null"), child_completed(1, "5")]);
    assert_eq!(commands.iter().filter(|c| matches!(c, Command::StartChildWorkflow { .. })).count(), 1);
    assert_completed(&commands, "5 / watcher saw 5");
}

#[test]
fn child_handle_reports_run_id_once_started() {
    type Snapshot = (Option<String>, Option<ChildState>, Option<String>);
    let seen: Arc<Mutex<Vec<Snapshot>>> = Arc::default();
    let wf_seen = Arc::clone(&seen);

    let h = handler(move |ctx: WorkflowContext, _input: String| {
        let seen = Arc::clone(&wf_seen);
        async move {
            let pending = invoke_async(&child_stub(&ctx).method("execute"), &())?.typed::<u32>();
            let snapshot = |f: &durochild::AsyncFuture| (f.child_workflow_id(), f.child_state(), f.child_run_id());
            seen.lock().unwrap().push(snapshot(pending.untyped()));
            ctx.sleep(Duration::from_millis(1)).await;
            seen.lock().unwrap().push(snapshot(pending.untyped()));
            let v = pending.await?;
            Ok::<String, WorkflowError>(v.to_string())
        }
    });

    let mut ctx = create_ctx(h);
    let commands = execute(
        &mut ctx,
        vec![
            started("null"),
            child_started(1),
            Event::TimerFired { seq: 2 },
            child_completed(1, "4"),
        ],
    );
    assert_completed(&commands, "4");
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Some("wf::1".to_string()), Some(ChildState::Starting), None),
            (
                Some("wf::1".to_string()),
                Some(ChildState::Running),
                Some("run-child-1".to_string())
            ),
        ]
    );
    assert_eq!(ctx.children().len(), 1);
}
