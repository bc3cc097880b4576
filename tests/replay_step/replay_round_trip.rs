use super::helpers::*;
use durochild::converter::default_converter;
use durochild::runtime::execution::replay;
use durochild::{Command, Event, WorkflowContext, WorkflowError, invoke_async, run_step};

async fn fan_out_then_direct(ctx: WorkflowContext, _input: String) -> Result<String, WorkflowError> {
    let stub = child_stub(&ctx);
    let a = invoke_async(&stub.method("execute"), &1u32)?.typed::<u32>();
    let b = invoke_async(&stub.method("execute"), &2u32)?.typed::<u32>();
    let sum = a.await? + b.await?;
    let c: u32 = stub.call("execute", &sum).await?;
    Ok(c.to_string())
}

fn live_commands(history: &[Event]) -> Vec<Command> {
    let mut ctx = create_ctx(handler(fan_out_then_direct));
    let mut commands = Vec::new();
    for event in history.iter().filter(|e| !e.is_command_record()) {
        commands.extend(run_step(&mut ctx, event.clone()).unwrap().commands);
    }
    commands
}

#[test]
fn replay_reproduces_the_recorded_commands() {
    let history = record_history(handler(fan_out_then_direct), "null", |seq| (seq * 10).to_string());
    assert!(matches!(history.last(), Some(Event::WorkflowCompleted { result }) if result == "30"));

    let ctx = replay(info(), handler(fan_out_then_direct), default_converter(), &history).unwrap();
    assert!(ctx.is_complete());
    assert_eq!(ctx.events_applied(), history.len());
    assert_eq!(ctx.issued_commands(), live_commands(&history).as_slice());
}

#[test]
fn every_history_prefix_replays_and_continues_live() {
    let history = record_history(handler(fan_out_then_direct), "null", |seq| (seq * 10).to_string());
    let full = live_commands(&history);

    // Cut only after an input event's records, where a real task boundary can fall.
    for cut in 1..history.len() {
        if history[cut].is_command_record() {
            continue;
        }
        let mut ctx = replay(info(), handler(fan_out_then_direct), default_converter(), &history[..cut])
            .unwrap_or_else(|e| panic!("prefix {cut} failed: {e}"));
        for event in history[cut..].iter().filter(|e| !e.is_command_record()) {
            run_step(&mut ctx, event.clone()).unwrap();
        }
        assert_eq!(ctx.issued_commands(), full.as_slice(), "prefix {cut}");
    }
}
