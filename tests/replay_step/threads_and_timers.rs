use super::helpers::*;
use durochild::{Command, Event, WorkflowContext, WorkflowError, invoke_async, run_step};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn timer_suspends_until_fired() {
    async fn sleeps_then_starts_child(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
        ctx.sleep(Duration::from_millis(250)).await;
        invoke_async(&child_stub(&ctx).method("execute"), &())?.await
    }

    let mut ctx = create_ctx(handler(sleeps_then_starts_child));
    let out = run_step(&mut ctx, started("null")).unwrap();
    assert_eq!(out.commands, vec![Command::StartTimer { seq: 1, delay_ms: 250 }]);

    let out = run_step(&mut ctx, Event::TimerFired { seq: 1 }).unwrap();
    assert_eq!(
        out.commands,
        vec![Command::StartChildWorkflow {
            seq: 2,
            workflow_type: "Child".into(),
            method: "execute".into(),
            workflow_id: "wf::2".into(),
            task_queue: QUEUE.into(),
            input: "null".into(),
            execution_timeout_ms: None,
            detached: false,
        }]
    );
}

#[test]
fn blocked_threads_resume_in_the_order_they_blocked() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let wf_log = Arc::clone(&log);

    let h = handler(move |ctx: WorkflowContext, _input: String| {
        let log = Arc::clone(&wf_log);
        async move {
            let pending = invoke_async(&child_stub(&ctx).method("execute"), &())?;
            let mut threads = Vec::new();
            for name in ["first", "second", "third"] {
                let waiter = pending.clone();
                let log = Arc::clone(&log);
                threads.push(ctx.spawn(async move {
                    waiter.await?;
                    log.lock().unwrap().push(name);
                    Ok::<String, WorkflowError>(String::new())
                }));
            }
            for t in threads {
                t.await?;
            }
            Ok::<String, WorkflowError>("joined".into())
        }
    });

    let mut ctx = create_ctx(h);
    execute(&mut ctx, vec![started("null")]);
    assert_eq!(ctx.live_threads(), 4);

    let commands = execute(&mut ctx, vec![child_completed(1, "1")]);
    assert_completed(&commands, "joined");
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn panicking_workflow_fails_instead_of_unwinding() {
    async fn panics(_ctx: WorkflowContext, input: String) -> Result<String, WorkflowError> {
        if input == "null" {
            panic!("unexpected input");
        }
        Ok(input)
    }

    let mut ctx = create_ctx(handler(panics));
    let commands = execute(&mut ctx, vec![started("null")]);
    assert_failed_with(&commands, |e| {
        matches!(e, WorkflowError::Application { message } if message.contains("panicked: unexpected input"))
    });
}

#[test]
fn replaying_flag_is_visible_to_workflow_code() {
    let seen: Arc<Mutex<Vec<bool>>> = Arc::default();
    let wf_seen = Arc::clone(&seen);
    let h = handler(move |ctx: WorkflowContext, _input: String| {
        let seen = Arc::clone(&wf_seen);
        async move {
            seen.lock().unwrap().push(ctx.is_replaying());
            durochild::workflow_info!(ctx, "before child");
            let v = invoke_async(&child_stub(&ctx).method("execute"), &())?.await?;
            seen.lock().unwrap().push(ctx.is_replaying());
            Ok::<String, WorkflowError>(v)
        }
    });

    let history = vec![started("null"), start_child(1).to_record()];
    let mut ctx = durochild::runtime::execution::replay(info(), h, durochild::converter::default_converter(), &history)
        .unwrap();
    let commands = execute(&mut ctx, vec![child_completed(1, "7")]);
    assert_completed(&commands, "7");
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}
