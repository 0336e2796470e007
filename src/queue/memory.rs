// In-process queue backend with lease-based at-least-once delivery

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::errors::{QueueError, QueueResult};
use crate::core::types::{
    BatchId, GroupStatus, JobId, JobSpec, JobState, LeasedJob, PageJobResult, PageOutcome,
};
use crate::queue::JobQueue;

struct QueuedJob {
    job_id: JobId,
    batch_id: BatchId,
    spec: JobSpec,
    attempt: u32,
}

struct LeaseRecord {
    job: QueuedJob,
    deadline: Instant,
}

#[derive(Default)]
struct GroupRecord {
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<QueuedJob>,
    leased: HashMap<JobId, LeaseRecord>,
    states: HashMap<JobId, JobState>,
    groups: HashMap<BatchId, GroupRecord>,
}

/// In-process queue. Jobs whose lease expires are pushed back to the front
/// of the ready deque with an incremented attempt counter, giving workers
/// at-least-once delivery without any background reaper.
pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
    lease: Duration,
}

impl MemoryQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            lease,
        }
    }

    /// Move expired leases back to the ready deque. Called lazily from
    /// `reserve`, so redelivery needs no timer task.
    fn requeue_expired(inner: &mut QueueInner) {
        let now = Instant::now();
        let expired: Vec<JobId> = inner
            .leased
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for job_id in expired {
            if let Some(mut lease) = inner.leased.remove(&job_id) {
                debug!(job = %job_id, attempt = lease.job.attempt, "lease expired, redelivering");
                lease.job.attempt += 1;
                inner.states.insert(job_id, JobState::Pending);
                inner.ready.push_front(lease.job);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, batch: BatchId, spec: JobSpec) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let mut inner = self.inner.lock();
        inner.states.insert(job_id, JobState::Pending);
        inner.groups.entry(batch).or_default().total += 1;
        inner.ready.push_back(QueuedJob {
            job_id,
            batch_id: batch,
            spec,
            attempt: 1,
        });
        Ok(job_id)
    }

    async fn status(&self, job: JobId) -> QueueResult<Option<JobState>> {
        Ok(self.inner.lock().states.get(&job).copied())
    }

    async fn group_status(&self, batch: BatchId) -> QueueResult<Option<GroupStatus>> {
        Ok(self.inner.lock().groups.get(&batch).map(|g| GroupStatus {
            total: g.total,
            succeeded: g.succeeded,
            failed: g.failed,
            skipped: g.skipped,
        }))
    }

    async fn reserve(&self) -> QueueResult<Option<LeasedJob>> {
        let mut inner = self.inner.lock();
        Self::requeue_expired(&mut inner);

        let Some(job) = inner.ready.pop_front() else {
            return Ok(None);
        };

        let leased = LeasedJob {
            job_id: job.job_id,
            batch_id: job.batch_id,
            spec: job.spec.clone(),
            attempt: job.attempt,
        };
        inner.states.insert(job.job_id, JobState::Started);
        inner.leased.insert(
            job.job_id,
            LeaseRecord {
                job,
                deadline: Instant::now() + self.lease,
            },
        );
        Ok(Some(leased))
    }

    async fn ack(&self, job: JobId, result: PageJobResult) -> QueueResult<()> {
        let mut inner = self.inner.lock();

        let batch_id = match inner.leased.remove(&job) {
            Some(lease) => lease.job.batch_id,
            None => {
                // Late ack after redelivery: the job may be back in the
                // ready deque, or already acked by the other delivery.
                let pos = inner.ready.iter().position(|j| j.job_id == job);
                match pos.and_then(|p| inner.ready.remove(p)) {
                    Some(queued) => queued.batch_id,
                    None => match inner.states.get(&job) {
                        Some(JobState::Done) => return Ok(()),
                        Some(_) | None => return Err(QueueError::UnknownJob(job.to_string())),
                    },
                }
            }
        };

        // Count each job exactly once, no matter how many deliveries raced.
        if inner.states.get(&job) == Some(&JobState::Done) {
            return Ok(());
        }
        inner.states.insert(job, JobState::Done);

        let group = inner.groups.entry(batch_id).or_default();
        match result.outcome {
            PageOutcome::Success => group.succeeded += 1,
            PageOutcome::Failure => group.failed += 1,
            PageOutcome::Skipped => group.skipped += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::engines::{Lang, OcrEngineKind};

    fn ocr_spec(page: &str) -> JobSpec {
        JobSpec::Ocr {
            project: "my-project".to_string(),
            page: page.to_string(),
            engine: OcrEngineKind::Google,
            language: Lang::Sa,
            secondary: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_reserve_ack_flow() {
        let queue = MemoryQueue::new(Duration::from_secs(300));
        let batch = BatchId::new();
        let job_id = queue.enqueue(batch, ocr_spec("1")).await.unwrap();

        assert_eq!(queue.status(job_id).await.unwrap(), Some(JobState::Pending));

        let leased = queue.reserve().await.unwrap().unwrap();
        assert_eq!(leased.job_id, job_id);
        assert_eq!(leased.attempt, 1);
        assert_eq!(queue.status(job_id).await.unwrap(), Some(JobState::Started));

        queue
            .ack(job_id, PageJobResult::success("1", crate::core::types::RevisionId(1)))
            .await
            .unwrap();
        assert_eq!(queue.status(job_id).await.unwrap(), Some(JobState::Done));

        let group = queue.group_status(batch).await.unwrap().unwrap();
        assert_eq!(group.total, 1);
        assert_eq!(group.succeeded, 1);
        assert_eq!(group.completed(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new(Duration::from_millis(20));
        let batch = BatchId::new();
        let job_id = queue.enqueue(batch, ocr_spec("1")).await.unwrap();

        let first = queue.reserve().await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);

        // No ack; let the lease expire.
        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue.reserve().await.unwrap().unwrap();
        assert_eq!(second.job_id, job_id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_acked_job_is_not_redelivered() {
        let queue = MemoryQueue::new(Duration::from_millis(20));
        let batch = BatchId::new();
        let job_id = queue.enqueue(batch, ocr_spec("1")).await.unwrap();

        let leased = queue.reserve().await.unwrap().unwrap();
        queue
            .ack(leased.job_id, PageJobResult::skipped("1"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.reserve().await.unwrap().is_none());
        assert_eq!(queue.status(job_id).await.unwrap(), Some(JobState::Done));
    }

    #[tokio::test]
    async fn test_double_ack_counts_once() {
        let queue = MemoryQueue::new(Duration::from_secs(300));
        let batch = BatchId::new();
        let job_id = queue.enqueue(batch, ocr_spec("1")).await.unwrap();

        let _ = queue.reserve().await.unwrap().unwrap();
        queue
            .ack(job_id, PageJobResult::failure("1", "boom"))
            .await
            .unwrap();
        queue
            .ack(job_id, PageJobResult::failure("1", "boom again"))
            .await
            .unwrap();

        let group = queue.group_status(batch).await.unwrap().unwrap();
        assert_eq!(group.failed, 1);
        assert_eq!(group.completed(), 1);
    }

    #[tokio::test]
    async fn test_unknown_group_and_job() {
        let queue = MemoryQueue::new(Duration::from_secs(300));
        assert!(queue.group_status(BatchId::new()).await.unwrap().is_none());
        assert!(queue.status(JobId::new()).await.unwrap().is_none());
        assert!(matches!(
            queue.ack(JobId::new(), PageJobResult::skipped("1")).await,
            Err(QueueError::UnknownJob(_))
        ));
    }
}
