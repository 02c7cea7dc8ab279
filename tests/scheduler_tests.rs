//! Tests for the command queue: submission, cancellation, and the
//! tick-driven admission gates.
//!
//! These tests validate that:
//! - Reload-causing jobs wait while the editor is busy, and later
//!   non-disruptive jobs are admitted past them.
//! - At most one Heavy job runs at a time, including two becoming
//!   eligible in the same tick; Instant and Smooth jobs are exempt.
//! - A multi-command job advances one command per tick and stays
//!   observable as Running in between.
//! - Cancellation works only for the submitting agent and only before
//!   execution starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use hostbridge::scheduler::classify;
use hostbridge::scheduler::{
    BatchCommand, CommandQueue, ExecutionTier, JobStatus, TicketStore, REASON_EDITOR_BUSY,
    REASON_HEAVY_ACTIVE,
};

/// Build a command the way submission does: classify the tier and reload
/// flag from the tool and params.
fn command(tool: &str, params: Value) -> BatchCommand {
    let tier = classify::classify(tool, ExecutionTier::Smooth, &params);
    let reload = classify::causes_domain_reload(tool, &params);
    BatchCommand::new(tool, params, tier, reload)
}

fn read_console() -> BatchCommand {
    command("console", json!({ "action": "read" }))
}

fn run_tests() -> BatchCommand {
    // Heavy, but does not trigger a domain reload.
    command("tests", json!({ "action": "run" }))
}

fn recompile() -> BatchCommand {
    // Heavy and triggers a domain reload.
    command("scripts", json!({ "action": "recompile" }))
}

/// Queue over a probe the test can flip between idle and busy.
fn queue_with_probe() -> (CommandQueue, Arc<AtomicBool>) {
    let busy = Arc::new(AtomicBool::new(false));
    let queue = CommandQueue::new(TicketStore::new(), Box::new(busy.clone()));
    (queue, busy)
}

fn idle_queue() -> CommandQueue {
    queue_with_probe().0
}

fn ok_executor() -> impl FnMut(&str, &Value) -> Result<Value, String> {
    |_, _| Ok(json!({ "ok": true }))
}

fn status_of(queue: &CommandQueue, ticket: &str) -> JobStatus {
    queue.poll(ticket).unwrap().status
}

// ---------------------------------------------------------------------------
// Submission and polling
// ---------------------------------------------------------------------------

#[test]
fn test_submit_returns_queued_job() {
    let mut queue = idle_queue();

    let job = queue.submit("alice", "setup", false, vec![read_console(), recompile()]);

    assert_eq!(job.ticket, "t-000001");
    assert_eq!(job.status, JobStatus::Queued);
    // Max tier over the commands, OR of the reload flags.
    assert_eq!(job.tier, ExecutionTier::Heavy);
    assert!(job.causes_domain_reload);
    assert_eq!(job.commands.len(), 2);
}

#[test]
fn test_poll_unknown_ticket() {
    let queue = idle_queue();
    assert!(queue.poll("t-000042").is_none());
    assert!(queue.poll("garbage").is_none());
}

#[test]
fn test_submit_marks_queue_dirty() {
    let mut queue = idle_queue();
    assert!(!queue.needs_flush());

    queue.submit("alice", "job", false, vec![read_console()]);
    assert!(queue.needs_flush());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn test_cancel_queued_job_by_owner() {
    let mut queue = idle_queue();
    let job = queue.submit("alice", "job", false, vec![read_console()]);

    assert!(queue.cancel(&job.ticket, "alice"));

    let cancelled = queue.poll(&job.ticket).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
}

#[test]
fn test_cancel_refused_for_wrong_agent() {
    let mut queue = idle_queue();
    let job = queue.submit("alice", "job", false, vec![read_console()]);

    assert!(!queue.cancel(&job.ticket, "mallory"));
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Queued);
}

#[test]
fn test_cancel_refused_once_running() {
    let mut queue = idle_queue();
    // Two commands so the job is still running after the first tick.
    let job = queue.submit("alice", "job", false, vec![read_console(), read_console()]);

    let mut exec = ok_executor();
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Running);

    assert!(!queue.cancel(&job.ticket, "alice"));
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Running);
}

#[test]
fn test_cancel_refused_for_unknown_or_terminal() {
    let mut queue = idle_queue();
    assert!(!queue.cancel("t-000042", "alice"));

    let job = queue.submit("alice", "job", false, vec![read_console()]);
    assert!(queue.cancel(&job.ticket, "alice"));
    // Second attempt hits a terminal job.
    assert!(!queue.cancel(&job.ticket, "alice"));
}

#[test]
fn test_anonymous_submitter_can_cancel() {
    let mut queue = idle_queue();
    let job = queue.submit("", "job", false, vec![read_console()]);

    // Both the empty and the whitespace-only form collapse to anonymous.
    assert!(queue.cancel(&job.ticket, "  "));
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Wait position and blocked reasons
// ---------------------------------------------------------------------------

#[test]
fn test_ahead_of_counts_earlier_queued_jobs() {
    let mut queue = idle_queue();
    let first = queue.submit("alice", "a", false, vec![read_console()]);
    queue.submit("alice", "b", false, vec![read_console()]);
    let third = queue.submit("alice", "c", false, vec![read_console()]);

    assert_eq!(queue.ahead_of(&first.ticket).len(), 0);
    assert_eq!(queue.ahead_of(&third.ticket).len(), 2);

    // A cancelled job leaves the line.
    queue.cancel(&first.ticket, "alice");
    assert_eq!(queue.ahead_of(&third.ticket).len(), 1);

    assert!(queue.ahead_of("t-000099").is_empty());
}

#[test]
fn test_blocked_reason_for_reload_job_while_busy() {
    let (mut queue, busy) = queue_with_probe();
    let disruptive = queue.submit("alice", "compile", false, vec![recompile()]);
    let harmless = queue.submit("alice", "read", false, vec![read_console()]);

    busy.store(true, Ordering::Relaxed);
    assert_eq!(
        queue.blocked_reason(&disruptive.ticket),
        Some(REASON_EDITOR_BUSY)
    );
    assert_eq!(queue.blocked_reason(&harmless.ticket), None);

    busy.store(false, Ordering::Relaxed);
    assert_eq!(queue.blocked_reason(&disruptive.ticket), None);
}

#[test]
fn test_blocked_reason_for_heavy_job_behind_heavy() {
    let mut queue = idle_queue();
    let active = queue.submit("alice", "tests", false, vec![run_tests(), run_tests()]);
    let waiting = queue.submit("alice", "more tests", false, vec![run_tests()]);
    let light = queue.submit("alice", "read", false, vec![read_console(), read_console()]);

    let mut exec = ok_executor();
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &active.ticket), JobStatus::Running);

    assert_eq!(
        queue.blocked_reason(&waiting.ticket),
        Some(REASON_HEAVY_ACTIVE)
    );
    // Not Heavy, so the mutex does not apply; it is running already.
    assert_eq!(queue.blocked_reason(&light.ticket), None);
}

#[test]
fn test_blocked_reason_none_for_non_queued() {
    let mut queue = idle_queue();
    assert_eq!(queue.blocked_reason("t-000042"), None);

    let job = queue.submit("alice", "job", false, vec![read_console()]);
    let mut exec = ok_executor();
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Done);
    assert_eq!(queue.blocked_reason(&job.ticket), None);
}

// ---------------------------------------------------------------------------
// Tick execution
// ---------------------------------------------------------------------------

#[test]
fn test_single_command_job_finishes_in_one_tick() {
    let mut queue = idle_queue();
    let job = queue.submit("alice", "job", false, vec![read_console()]);

    let mut exec = ok_executor();
    let admitted = queue.process_tick(&mut exec);

    assert_eq!(admitted, vec![job.ticket.clone()]);
    let done = queue.poll(&job.ticket).unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());
}

#[test]
fn test_multi_command_job_advances_one_command_per_tick() {
    let mut queue = idle_queue();
    let job = queue.submit(
        "alice",
        "job",
        false,
        vec![read_console(), read_console(), read_console()],
    );

    let mut executed = 0usize;
    let mut exec = |_: &str, _: &Value| -> Result<Value, String> {
        executed += 1;
        Ok(json!({}))
    };

    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Running);
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Running);
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Done);

    assert_eq!(executed, 3);
}

#[test]
fn test_empty_command_list_finishes_done() {
    let mut queue = idle_queue();
    let job = queue.submit("alice", "empty", false, vec![]);

    let mut exec = ok_executor();
    queue.process_tick(&mut exec);

    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Done);
}

#[test]
fn test_executor_failure_fails_job_and_skips_rest() {
    let mut queue = idle_queue();
    let job = queue.submit(
        "alice",
        "job",
        false,
        vec![
            read_console(),
            command("scene", json!({ "action": "get_state", "fail": "scene is corrupt" })),
            read_console(),
        ],
    );

    let mut executed = Vec::new();
    let mut exec = |tool: &str, params: &Value| -> Result<Value, String> {
        executed.push(tool.to_string());
        match params.get("fail").and_then(Value::as_str) {
            Some(message) => Err(message.to_string()),
            None => Ok(json!({})),
        }
    };

    queue.process_tick(&mut exec);
    queue.process_tick(&mut exec);
    queue.process_tick(&mut exec);

    let failed = queue.poll(&job.ticket).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("scene is corrupt"));
    assert!(failed.completed_at.is_some());
    // The command after the failure never ran.
    assert_eq!(executed, vec!["console", "scene"]);
}

// ---------------------------------------------------------------------------
// Admission: busy gate
// ---------------------------------------------------------------------------

#[test]
fn test_busy_editor_gates_reload_jobs_only() {
    let (mut queue, busy) = queue_with_probe();
    let disruptive = queue.submit("alice", "compile", false, vec![recompile()]);
    let harmless = queue.submit("alice", "read", false, vec![read_console()]);

    busy.store(true, Ordering::Relaxed);
    let mut exec = ok_executor();
    let admitted = queue.process_tick(&mut exec);

    // The later non-reload job is admitted past the blocked one.
    assert_eq!(admitted, vec![harmless.ticket.clone()]);
    assert_eq!(status_of(&queue, &disruptive.ticket), JobStatus::Queued);
    assert_eq!(status_of(&queue, &harmless.ticket), JobStatus::Done);

    busy.store(false, Ordering::Relaxed);
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &disruptive.ticket), JobStatus::Done);
}

#[test]
fn test_heavy_non_reload_job_ignores_busy_editor() {
    let (mut queue, busy) = queue_with_probe();
    let job = queue.submit("alice", "tests", false, vec![run_tests()]);

    busy.store(true, Ordering::Relaxed);
    let mut exec = ok_executor();
    queue.process_tick(&mut exec);

    // Heavy alone does not wait for the editor; only the reload flag does.
    assert_eq!(status_of(&queue, &job.ticket), JobStatus::Done);
}

// ---------------------------------------------------------------------------
// Admission: heavy mutex
// ---------------------------------------------------------------------------

#[test]
fn test_heavy_jobs_run_one_at_a_time() {
    let mut queue = idle_queue();
    let first = queue.submit("alice", "a", false, vec![run_tests(), run_tests()]);
    let second = queue.submit("alice", "b", false, vec![run_tests()]);

    let mut exec = ok_executor();

    // Both are eligible in the same tick; only the first is admitted.
    let admitted = queue.process_tick(&mut exec);
    assert_eq!(admitted, vec![first.ticket.clone()]);
    assert_eq!(status_of(&queue, &first.ticket), JobStatus::Running);
    assert_eq!(status_of(&queue, &second.ticket), JobStatus::Queued);
    assert!(queue.has_active_heavy());

    // Still held while the first runs its second command.
    let admitted = queue.process_tick(&mut exec);
    assert!(admitted.is_empty());
    assert_eq!(status_of(&queue, &first.ticket), JobStatus::Done);

    // Released: the second heavy job goes through.
    let admitted = queue.process_tick(&mut exec);
    assert_eq!(admitted, vec![second.ticket.clone()]);
    assert_eq!(status_of(&queue, &second.ticket), JobStatus::Done);
}

#[test]
fn test_instant_and_smooth_run_alongside_heavy() {
    let mut queue = idle_queue();
    let heavy = queue.submit("alice", "tests", false, vec![run_tests(), run_tests()]);

    let mut exec = ok_executor();
    queue.process_tick(&mut exec);
    assert_eq!(status_of(&queue, &heavy.ticket), JobStatus::Running);

    let instant = queue.submit("alice", "read", false, vec![read_console()]);
    let smooth = queue.submit(
        "alice",
        "nudge",
        false,
        vec![command("objects", json!({ "action": "move" }))],
    );
    let blocked_heavy = queue.submit("alice", "more", false, vec![run_tests()]);

    let admitted = queue.process_tick(&mut exec);
    assert!(admitted.contains(&instant.ticket));
    assert!(admitted.contains(&smooth.ticket));
    assert!(!admitted.contains(&blocked_heavy.ticket));

    assert_eq!(status_of(&queue, &instant.ticket), JobStatus::Done);
    assert_eq!(status_of(&queue, &smooth.ticket), JobStatus::Done);
    assert_eq!(status_of(&queue, &blocked_heavy.ticket), JobStatus::Queued);
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

#[test]
fn test_queue_status_snapshot() {
    let mut queue = idle_queue();
    queue.submit("alice", "a", false, vec![run_tests(), run_tests()]);
    queue.submit("bob", "b", false, vec![read_console()]);
    queue.submit("bob", "c", false, vec![read_console()]);

    let status = queue.status();
    assert_eq!(status.depth, 3);
    assert!(!status.active_heavy);

    let mut exec = ok_executor();
    queue.process_tick(&mut exec);

    let status = queue.status();
    // Alice's heavy job is mid-flight; both of Bob's finished.
    assert_eq!(status.depth, 0);
    assert!(status.active_heavy);
    assert_eq!(status.agents.get("alice").unwrap().running, 1);
    assert_eq!(status.agents.get("bob").unwrap().done, 2);
}
