pub mod classify;
pub mod job;
pub mod queue;
pub mod store;

pub use job::{BatchCommand, BatchJob, ExecutionTier, JobStatus, ANONYMOUS_AGENT};
pub use queue::{CommandQueue, QueueStatus, REASON_EDITOR_BUSY, REASON_HEAVY_ACTIVE};
pub use store::{AgentStats, TicketStore, INTERRUPTED_ERROR};
