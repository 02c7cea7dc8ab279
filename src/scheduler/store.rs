//! The authoritative job table: ticket issuance, status transitions,
//! retention cleanup, and the JSON snapshot that carries queued work
//! across an editor restart or domain reload.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::job::{
    format_ticket, ticket_seq, BatchCommand, BatchJob, ExecutionTier, JobStatus,
};

/// Error recorded on jobs that were running when the host went down. The
/// exact string is part of the contract: pollers match on it to tell an
/// interrupted job from an ordinary execution failure.
pub const INTERRUPTED_ERROR: &str = "interrupted by editor restart or domain reload";

const SNAPSHOT_SCHEMA: u32 = 1;

/// Per-agent status counts, recomputed on demand.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl AgentStats {
    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// On-disk form of the whole store: the job table plus the counter, one
/// JSON document. There is no write-ahead log; a crash between a state
/// change and a flush loses at most that window, and the `Running` jobs in
/// it are rewritten to `Failed` on the next load.
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    schema: u32,
    next_ticket: u64,
    jobs: Vec<BatchJob>,
}

/// Owns every job for its entire lifetime. All mutation goes through the
/// methods here; the queue and the entry points never touch job state
/// directly.
#[derive(Debug)]
pub struct TicketStore {
    jobs: HashMap<String, BatchJob>,
    next_ticket: u64,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            next_ticket: 1,
        }
    }

    /// Allocate the next ticket and store a fresh `Queued` job. The command
    /// list starts empty; the queue attaches it via [`attach_commands`]
    /// before the job is visible to callers.
    ///
    /// [`attach_commands`]: TicketStore::attach_commands
    pub fn create_job(&mut self, agent: &str, label: &str, tier: ExecutionTier) -> BatchJob {
        let ticket = format_ticket(self.next_ticket);
        self.next_ticket += 1;
        let job = BatchJob::new(ticket.clone(), agent, label, tier);
        tracing::debug!(ticket = %ticket, agent = %job.agent, tier = %tier, "Job created");
        self.jobs.insert(ticket, job.clone());
        job
    }

    /// Fix the job's command list and reload flag. Both are immutable after
    /// this point. Returns the updated job, or None for an unknown ticket.
    pub fn attach_commands(
        &mut self,
        ticket: &str,
        commands: Vec<BatchCommand>,
        causes_domain_reload: bool,
    ) -> Option<BatchJob> {
        let job = self.jobs.get_mut(ticket)?;
        job.commands = commands;
        job.causes_domain_reload = causes_domain_reload;
        Some(job.clone())
    }

    /// O(1) lookup. A miss is a normal outcome (stale or fabricated
    /// tickets), not something to log.
    pub fn get_job(&self, ticket: &str) -> Option<&BatchJob> {
        self.jobs.get(ticket)
    }

    /// Move a `Queued` job to `Running`. Returns false for unknown tickets
    /// or any other starting status.
    pub fn mark_running(&mut self, ticket: &str) -> bool {
        match self.jobs.get_mut(ticket) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Complete a `Running` job: `Done` when no error, `Failed` with the
    /// error captured otherwise. Stamps `completed_at`.
    pub fn finish(&mut self, ticket: &str, error: Option<String>) -> bool {
        match self.jobs.get_mut(ticket) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = if error.is_some() {
                    JobStatus::Failed
                } else {
                    JobStatus::Done
                };
                job.error = error;
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Move a `Queued` job to `Cancelled` and stamp `completed_at`. Running
    /// and terminal jobs are left untouched (no preemption).
    pub fn mark_cancelled(&mut self, ticket: &str) -> bool {
        match self.jobs.get_mut(ticket) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Remove terminal jobs whose `completed_at` is older than
    /// `now - retention`. Non-terminal jobs are never removed regardless of
    /// age: queued work must not silently disappear. Returns the number of
    /// jobs removed.
    pub fn clean_expired(&mut self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        let removed = before - self.jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Expired jobs cleaned");
        }
        removed
    }

    /// Aggregate counts per submitting agent.
    pub fn agent_stats(&self) -> HashMap<String, AgentStats> {
        let mut stats: HashMap<String, AgentStats> = HashMap::new();
        for job in self.jobs.values() {
            stats.entry(job.agent.clone()).or_default().record(job.status);
        }
        stats
    }

    /// Count of jobs currently `Queued`.
    pub fn queue_depth(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count()
    }

    /// All `Queued` jobs in creation order. FIFO here is the scheduling
    /// invariant; the queue only deviates from it through the explicit
    /// admission bypass.
    pub fn queued_jobs(&self) -> Vec<&BatchJob> {
        let mut jobs: Vec<&BatchJob> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        jobs.sort_by_key(|j| (j.created_at, ticket_seq(&j.ticket)));
        jobs
    }

    /// Every job in the table, unordered.
    pub fn jobs(&self) -> impl Iterator<Item = &BatchJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Serialize the whole table plus the next-ticket counter.
    pub fn to_json(&self) -> Result<String> {
        let mut jobs: Vec<BatchJob> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, ticket_seq(&j.ticket)));
        let snapshot = StoreSnapshot {
            schema: SNAPSHOT_SCHEMA,
            next_ticket: self.next_ticket,
            jobs,
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Replace the table from a serialized snapshot. Empty (or JSON null)
    /// input is a no-op. Every job found `Running` is rewritten to `Failed`
    /// with [`INTERRUPTED_ERROR`]: the thread that was executing it died
    /// with the old domain, so it must never be resurrected as in-flight.
    /// `Queued` jobs are kept as-is and will be re-evaluated on the next
    /// tick. Returns how many jobs were rewritten, so the caller can tell
    /// that the in-memory table no longer matches the snapshot it came
    /// from.
    pub fn from_json(&mut self, text: &str) -> Result<usize> {
        let text = text.trim();
        if text.is_empty() || text == "null" {
            return Ok(0);
        }
        let snapshot: StoreSnapshot = serde_json::from_str(text)?;

        let mut jobs = HashMap::with_capacity(snapshot.jobs.len());
        let mut highest = 0;
        let mut interrupted = 0;
        for mut job in snapshot.jobs {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.error = Some(INTERRUPTED_ERROR.to_string());
                job.completed_at = Some(Utc::now());
                interrupted += 1;
                tracing::warn!(ticket = %job.ticket, "Job was running at shutdown, marked failed");
            }
            if let Some(seq) = ticket_seq(&job.ticket) {
                highest = highest.max(seq);
            }
            jobs.insert(job.ticket.clone(), job);
        }

        self.jobs = jobs;
        // Trust the stored counter unless the table holds a higher ticket.
        self.next_ticket = snapshot.next_ticket.max(highest + 1);
        tracing::info!(
            jobs = self.jobs.len(),
            interrupted,
            next_ticket = self.next_ticket,
            "Store restored from snapshot"
        );
        Ok(interrupted)
    }

    /// Write the snapshot to disk via a sibling temp file and rename, so a
    /// crash mid-write leaves the previous snapshot intact.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a snapshot from disk. A missing file is an empty store, not an
    /// error. Returns the [`Self::from_json`] rewrite count.
    pub fn load_from(&mut self, path: &Path) -> Result<usize> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        self.from_json(&text)
    }
}
