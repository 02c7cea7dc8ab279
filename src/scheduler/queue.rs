//! Scheduling policy over the ticket store: submission, cancellation, and
//! the tick-driven dispatch that decides when a queued job may start.
//!
//! # Admission rules
//!
//! `process_tick` scans `Queued` jobs in creation order and admits every
//! job that passes both gates:
//!
//! 1. A job whose `causes_domain_reload` is true is not admitted while the
//!    editor probe reports busy. It stays `Queued`; later non-reload jobs
//!    may be admitted past it (the bypass that keeps non-disruptive work
//!    from starving behind a blocked disruptive job).
//! 2. A `Heavy` job is not admitted while another `Heavy` job is
//!    `Running`, including one admitted earlier in the same scan.
//!    `Instant` and `Smooth` jobs are exempt and run alongside a heavy
//!    job or each other.
//!
//! Admitted jobs run one command per tick, so a multi-command job stays
//! `Running` across consecutive ticks and each tick does bounded work.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::{CommandExecutor, EditorProbe};
use crate::scheduler::classify;
use crate::scheduler::job::{
    normalize_agent, ticket_seq, BatchCommand, BatchJob, ExecutionTier, JobStatus,
};
use crate::scheduler::store::{AgentStats, TicketStore};

/// Blocked reason for a reload-causing job gated on the busy editor.
pub const REASON_EDITOR_BUSY: &str =
    "editor is busy; jobs that trigger a domain reload wait until it is idle";

/// Blocked reason for a heavy job gated on the heavy-work mutex.
pub const REASON_HEAVY_ACTIVE: &str =
    "a heavy job is already running; heavy jobs execute one at a time";

/// Aggregate snapshot for dashboards and telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub active_heavy: bool,
    pub agents: std::collections::HashMap<String, AgentStats>,
}

/// Cursor into a `Running` job's command list. Deliberately transient:
/// recovery rewrites `Running` jobs to `Failed`, so a cursor never
/// outlives a restart.
struct InFlight {
    ticket: String,
    cursor: usize,
}

/// Wraps a [`TicketStore`] with the scheduling policy. Single-threaded by
/// design: the host (or the service shell's pump) calls `process_tick` on
/// its own cadence and guarantees non-reentrancy.
pub struct CommandQueue {
    store: TicketStore,
    probe: Box<dyn EditorProbe>,
    in_flight: Vec<InFlight>,
    dirty: bool,
}

impl CommandQueue {
    /// The store is passed in explicitly; the queue never reaches for
    /// ambient state.
    pub fn new(store: TicketStore, probe: Box<dyn EditorProbe>) -> Self {
        Self {
            store,
            probe,
            in_flight: Vec::new(),
            dirty: false,
        }
    }

    /// Create a job for the batch and return it immediately. Execution has
    /// not started when this returns; the job waits for a tick. The tier
    /// is the max over the commands, the reload flag the OR, both fixed
    /// here and never recomputed.
    pub fn submit(
        &mut self,
        agent: &str,
        label: &str,
        persist_hint: bool,
        commands: Vec<BatchCommand>,
    ) -> BatchJob {
        let tier = classify::classify_batch(&commands);
        let reload = classify::batch_causes_reload(&commands);
        let created = self.store.create_job(agent, label, tier);
        let job = self
            .store
            .attach_commands(&created.ticket, commands, reload)
            .unwrap_or(created);
        self.dirty = true;
        tracing::info!(
            ticket = %job.ticket,
            agent = %job.agent,
            tier = %job.tier,
            reload = job.causes_domain_reload,
            commands = job.commands.len(),
            persist_hint,
            "Batch submitted"
        );
        job
    }

    /// Pass-through to the store; a miss is a normal outcome.
    pub fn poll(&self, ticket: &str) -> Option<&BatchJob> {
        self.store.get_job(ticket)
    }

    /// Cancel a `Queued` job, but only for the agent that submitted it.
    /// Every other combination (wrong agent, running, terminal, unknown
    /// ticket) returns false and leaves all state untouched.
    pub fn cancel(&mut self, ticket: &str, agent: &str) -> bool {
        let authorized = matches!(
            self.store.get_job(ticket),
            Some(job) if job.status == JobStatus::Queued && job.agent == normalize_agent(agent)
        );
        if !authorized {
            return false;
        }
        let cancelled = self.store.mark_cancelled(ticket);
        if cancelled {
            self.dirty = true;
            tracing::info!(ticket = %ticket, agent = %normalize_agent(agent), "Job cancelled");
        }
        cancelled
    }

    /// `Queued` jobs created strictly before the named job, in creation
    /// order. A wait-position estimate for callers, not a scheduling
    /// promise. Empty for unknown tickets.
    pub fn ahead_of(&self, ticket: &str) -> Vec<&BatchJob> {
        let Some(seq) = self.store.get_job(ticket).and_then(|j| ticket_seq(&j.ticket)) else {
            return Vec::new();
        };
        self.store
            .queued_jobs()
            .into_iter()
            .filter(|j| ticket_seq(&j.ticket).is_some_and(|s| s < seq))
            .collect()
    }

    /// True iff some job is currently `Running` with tier `Heavy`.
    pub fn has_active_heavy(&self) -> bool {
        self.store
            .jobs()
            .any(|j| j.status == JobStatus::Running && j.tier == ExecutionTier::Heavy)
    }

    /// Re-evaluate the admission gates for one job without mutating
    /// anything. `None` means the job is not blocked: it is either merely
    /// waiting its turn, not `Queued`, or unknown. The gate order matches
    /// `process_tick`.
    pub fn blocked_reason(&self, ticket: &str) -> Option<&'static str> {
        let job = self.store.get_job(ticket)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        if job.causes_domain_reload && self.probe.is_busy() {
            return Some(REASON_EDITOR_BUSY);
        }
        if job.tier == ExecutionTier::Heavy && self.has_active_heavy() {
            return Some(REASON_HEAVY_ACTIVE);
        }
        None
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            depth: self.store.queue_depth(),
            active_heavy: self.has_active_heavy(),
            agents: self.store.agent_stats(),
        }
    }

    /// One scheduling tick: admit eligible queued jobs (see the module
    /// docs for the gates), then advance every running job by one command.
    /// Success on the last command finishes the job `Done`; the first
    /// executor error finishes it `Failed` with the error captured and the
    /// remaining commands skipped. Returns the tickets admitted this tick.
    pub fn process_tick(&mut self, executor: &mut dyn CommandExecutor) -> Vec<String> {
        let busy = self.probe.is_busy();
        let mut heavy_active = self.has_active_heavy();

        let eligible: Vec<(String, ExecutionTier)> = self
            .store
            .queued_jobs()
            .iter()
            .filter(|job| !(job.causes_domain_reload && busy))
            .map(|job| (job.ticket.clone(), job.tier))
            .collect();

        let mut admitted = Vec::new();
        for (ticket, tier) in eligible {
            if tier == ExecutionTier::Heavy && heavy_active {
                continue;
            }
            if self.store.mark_running(&ticket) {
                if tier == ExecutionTier::Heavy {
                    heavy_active = true;
                }
                tracing::debug!(ticket = %ticket, tier = %tier, "Job admitted");
                self.in_flight.push(InFlight {
                    ticket: ticket.clone(),
                    cursor: 0,
                });
                admitted.push(ticket);
            }
        }
        if !admitted.is_empty() {
            self.dirty = true;
        }

        let mut still_running = Vec::with_capacity(self.in_flight.len());
        for mut flight in std::mem::take(&mut self.in_flight) {
            let command = self
                .store
                .get_job(&flight.ticket)
                .and_then(|job| job.commands.get(flight.cursor).cloned());
            match command {
                None => {
                    // Past the end of the list (or an empty batch): done.
                    self.finish_job(&flight.ticket, None);
                }
                Some(command) => match executor.execute(&command.tool, &command.params) {
                    Ok(_) => {
                        flight.cursor += 1;
                        let total = self
                            .store
                            .get_job(&flight.ticket)
                            .map_or(flight.cursor, |job| job.commands.len());
                        if flight.cursor >= total {
                            self.finish_job(&flight.ticket, None);
                        } else {
                            still_running.push(flight);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            ticket = %flight.ticket,
                            tool = %command.tool,
                            error = %error,
                            "Command failed, remaining commands skipped"
                        );
                        self.finish_job(&flight.ticket, Some(error));
                    }
                },
            }
        }
        self.in_flight = still_running;

        admitted
    }

    fn finish_job(&mut self, ticket: &str, error: Option<String>) {
        if self.store.finish(ticket, error) {
            self.dirty = true;
            if let Some(job) = self.store.get_job(ticket) {
                tracing::info!(ticket = %ticket, status = %job.status, "Job finished");
            }
        }
    }

    /// Remove terminal jobs past the retention window.
    pub fn clean_expired(&mut self, retention: Duration) -> usize {
        let removed = self.store.clean_expired(retention);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// True when the table changed since the last flush.
    pub fn needs_flush(&self) -> bool {
        self.dirty
    }

    pub fn snapshot(&self) -> Result<String> {
        self.store.to_json()
    }

    /// Replace the table from a snapshot; see
    /// [`TicketStore::from_json`] for the recovery rewrite. Any in-flight
    /// cursors are dropped with the table they pointed into. A snapshot
    /// that held interrupted jobs leaves the queue dirty, so the repaired
    /// statuses reach the next flush instead of being re-stamped on every
    /// restart.
    pub fn restore(&mut self, text: &str) -> Result<()> {
        self.in_flight.clear();
        let repaired = self.store.from_json(text)?;
        if repaired > 0 {
            self.dirty = true;
        }
        Ok(())
    }

    /// Flush the snapshot to disk and clear the dirty flag.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        self.store.save_to(path)?;
        self.dirty = false;
        Ok(())
    }

    /// Load the snapshot from disk (missing file is an empty store). Like
    /// [`Self::restore`], interrupted-job repairs mark the queue dirty.
    pub fn load_from(&mut self, path: &Path) -> Result<()> {
        self.in_flight.clear();
        let repaired = self.store.load_from(path)?;
        if repaired > 0 {
            self.dirty = true;
        }
        Ok(())
    }

    pub fn store(&self) -> &TicketStore {
        &self.store
    }
}
