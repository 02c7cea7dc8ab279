use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent recorded for submissions that arrive without one.
pub const ANONYMOUS_AGENT: &str = "anonymous";

/// Empty and whitespace-only agents collapse to the anonymous sentinel, on
/// submission and on cancellation alike, so an anonymous submitter can
/// still cancel its own job.
pub fn normalize_agent(agent: &str) -> &str {
    if agent.trim().is_empty() {
        ANONYMOUS_AGENT
    } else {
        agent
    }
}

/// Cost/risk class of a command. The ordering is load-bearing: a batch
/// takes the maximum tier over its commands, and admission control gates
/// on tier comparison, not tier identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTier {
    Instant,
    Smooth,
    Heavy,
}

impl std::fmt::Display for ExecutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTier::Instant => write!(f, "instant"),
            ExecutionTier::Smooth => write!(f, "smooth"),
            ExecutionTier::Heavy => write!(f, "heavy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Done, Failed and Cancelled are terminal; Queued and Running are not.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One unit of work inside a batch. Immutable once created; `params` is
/// opaque to the queue and only inspected by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCommand {
    pub tool: String,
    pub params: Value,
    pub tier: ExecutionTier,
    pub causes_domain_reload: bool,
}

impl BatchCommand {
    pub fn new(tool: impl Into<String>, params: Value, tier: ExecutionTier, causes_domain_reload: bool) -> Self {
        Self {
            tool: tool.into(),
            params,
            tier,
            causes_domain_reload,
        }
    }
}

/// The unit of scheduling and the entity returned to callers.
///
/// Owned by the [`TicketStore`](crate::scheduler::TicketStore) for its whole
/// lifetime; status only changes through store methods. `tier` is the max
/// over the commands and `causes_domain_reload` the OR, both fixed at
/// creation. `completed_at` is set exactly when the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub ticket: String,
    pub agent: String,
    pub label: String,
    pub status: JobStatus,
    pub commands: Vec<BatchCommand>,
    pub tier: ExecutionTier,
    pub causes_domain_reload: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BatchJob {
    pub fn new(ticket: String, agent: &str, label: &str, tier: ExecutionTier) -> Self {
        Self {
            ticket,
            agent: normalize_agent(agent).to_string(),
            label: label.to_string(),
            status: JobStatus::Queued,
            commands: Vec::new(),
            tier,
            causes_domain_reload: false,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// Render a ticket from its sequence number: `t-000001`, `t-000002`, ...
/// Widths past six digits grow naturally; ordering comparisons go through
/// [`ticket_seq`], not the string form.
pub(crate) fn format_ticket(seq: u64) -> String {
    format!("t-{seq:06}")
}

/// Parse the sequence number back out of a ticket. Returns `None` for
/// strings that were never produced by [`format_ticket`].
pub(crate) fn ticket_seq(ticket: &str) -> Option<u64> {
    ticket.strip_prefix("t-").and_then(|digits| digits.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_takes_heavy_as_max() {
        assert!(ExecutionTier::Instant < ExecutionTier::Smooth);
        assert!(ExecutionTier::Smooth < ExecutionTier::Heavy);
        let max = [ExecutionTier::Smooth, ExecutionTier::Heavy, ExecutionTier::Instant]
            .into_iter()
            .max();
        assert_eq!(max, Some(ExecutionTier::Heavy));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn ticket_format_round_trips() {
        assert_eq!(format_ticket(1), "t-000001");
        assert_eq!(format_ticket(42), "t-000042");
        assert_eq!(format_ticket(1_000_000), "t-1000000");
        assert_eq!(ticket_seq("t-000042"), Some(42));
        assert_eq!(ticket_seq("t-1000000"), Some(1_000_000));
        assert_eq!(ticket_seq("bogus"), None);
        assert_eq!(ticket_seq("t-"), None);
    }

    #[test]
    fn empty_agent_defaults_to_anonymous() {
        let job = BatchJob::new("t-000001".into(), "", "setup", ExecutionTier::Instant);
        assert_eq!(job.agent, ANONYMOUS_AGENT);
        let job = BatchJob::new("t-000002".into(), "  ", "setup", ExecutionTier::Instant);
        assert_eq!(job.agent, ANONYMOUS_AGENT);
        let job = BatchJob::new("t-000003".into(), "codex", "setup", ExecutionTier::Instant);
        assert_eq!(job.agent, "codex");
    }
}
