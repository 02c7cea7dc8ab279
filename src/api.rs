//! Transport-independent entry points over the command queue: batch
//! submission with cap validation and classification, the poll snapshot,
//! and the aggregate queue status. The HTTP layer in `server` is a thin
//! adapter over these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::scheduler::classify;
use crate::scheduler::{BatchCommand, CommandQueue, ExecutionTier, JobStatus, QueueStatus};

/// Wire form of one command in a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    /// Caller-declared tier; `Smooth` when omitted.
    #[serde(default)]
    pub tier: Option<ExecutionTier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBatchRequest {
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub label: String,
    pub commands: Vec<CommandSpec>,
    /// Ask for a durable flush before the ticket is returned.
    #[serde(default)]
    pub persist: bool,
}

/// Echoes the classification so callers learn up front how their batch
/// will be scheduled.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub ticket: String,
    pub tier: ExecutionTier,
    pub causes_domain_reload: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub ticket: String,
    pub agent: String,
    pub label: String,
    pub status: JobStatus,
    pub tier: ExecutionTier,
    pub causes_domain_reload: bool,
    pub commands: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_ahead: Option<usize>,
}

/// Validate, classify, and enqueue a batch. Rejections happen here, before
/// any ticket is allocated: an empty list and anything past the hard cap
/// never reach the store. Sizes between the soft and hard caps are
/// accepted with a warning.
pub fn submit_batch(
    queue: &mut CommandQueue,
    config: &BridgeConfig,
    request: SubmitBatchRequest,
) -> Result<SubmitBatchResponse> {
    let count = request.commands.len();
    if count == 0 {
        return Err(BridgeError::EmptyBatch);
    }
    if count > config.hard_batch_cap {
        return Err(BridgeError::BatchTooLarge {
            count,
            cap: config.hard_batch_cap,
        });
    }
    if count > config.soft_batch_cap {
        tracing::warn!(
            count,
            soft_cap = config.soft_batch_cap,
            "Batch exceeds the soft cap"
        );
    }

    let commands: Vec<BatchCommand> = request
        .commands
        .into_iter()
        .map(|spec| {
            let declared = spec.tier.unwrap_or(ExecutionTier::Smooth);
            let tier = classify::classify(&spec.tool, declared, &spec.params);
            let reload = classify::causes_domain_reload(&spec.tool, &spec.params);
            BatchCommand::new(spec.tool, spec.params, tier, reload)
        })
        .collect();

    let job = queue.submit(&request.agent, &request.label, request.persist, commands);
    Ok(SubmitBatchResponse {
        ticket: job.ticket,
        tier: job.tier,
        causes_domain_reload: job.causes_domain_reload,
    })
}

/// Current job snapshot; while the job is still queued it also carries the
/// blocked reason (if any) and the count of queued jobs ahead, so a caller
/// can tell "waiting in line" from "blocked on the host".
pub fn poll(queue: &CommandQueue, ticket: &str) -> Option<PollResponse> {
    let job = queue.poll(ticket)?;
    let (blocked_reason, queued_ahead) = if job.status == JobStatus::Queued {
        (
            queue.blocked_reason(ticket).map(str::to_string),
            Some(queue.ahead_of(ticket).len()),
        )
    } else {
        (None, None)
    };
    Some(PollResponse {
        ticket: job.ticket.clone(),
        agent: job.agent.clone(),
        label: job.label.clone(),
        status: job.status,
        tier: job.tier,
        causes_domain_reload: job.causes_domain_reload,
        commands: job.commands.len(),
        created_at: job.created_at,
        completed_at: job.completed_at,
        error: job.error.clone(),
        blocked_reason,
        queued_ahead,
    })
}

/// The aggregate snapshot: queue depth, heavy-mutex state, per-agent
/// counts.
pub fn queue_status(queue: &CommandQueue) -> QueueStatus {
    queue.status()
}
