// Job queue contract
//
// The queue transport itself is an external collaborator; the core specifies
// only the contract it requires. The queue is the authority for job
// existence and state; registry entries merely point into it.

pub mod memory;

pub use memory::MemoryQueue;

use async_trait::async_trait;

use crate::core::errors::QueueResult;
use crate::core::types::{BatchId, GroupStatus, JobId, JobSpec, JobState, LeasedJob, PageJobResult};

/// Queue contract consumed by the orchestrator, the workers, and status
/// reconciliation.
///
/// Delivery is at-least-once: a reserved job whose lease expires without an
/// ack is redelivered, so page jobs must be safely repeatable. A job is
/// acknowledged only after it reaches a terminal outcome, never before
/// execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one page job under the given batch. The batch's group total
    /// grows with each enqueued job.
    async fn enqueue(&self, batch: BatchId, spec: JobSpec) -> QueueResult<JobId>;

    async fn status(&self, job: JobId) -> QueueResult<Option<JobState>>;

    /// Aggregate counters for a batch, or `None` for a batch the queue has
    /// no record of (e.g. after a queue reset).
    async fn group_status(&self, batch: BatchId) -> QueueResult<Option<GroupStatus>>;

    /// Worker side: lease the next ready job, if any.
    async fn reserve(&self) -> QueueResult<Option<LeasedJob>>;

    /// Worker side: record the terminal outcome and release the lease.
    /// Acking the same job twice counts it exactly once.
    async fn ack(&self, job: JobId, result: PageJobResult) -> QueueResult<()>;
}
