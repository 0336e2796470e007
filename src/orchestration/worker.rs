// Fixed-size worker pool pulling page jobs from the shared queue
//
// Workers are tokio tasks supervised per slot: a worker retires after a
// fixed number of jobs or when process RSS crosses the configured ceiling,
// and the supervisor spawns a fresh one in its place. Jobs are acknowledged
// only after a terminal outcome is recorded.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::types::BatchId;
use crate::orchestration::batch::aggregate;
use crate::orchestration::page_job::run_page_job;
use crate::orchestration::reconcile::clear_entry_for_task;
use crate::queue::JobQueue;
use crate::services::engines::EngineFactory;
use crate::services::registry::TaskRegistry;
use crate::store::DocumentStore;
use crate::utils::{mem, Metrics};

/// How long an idle worker sleeps before polling the queue again.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<dyn TaskRegistry>,
    pub factory: Arc<dyn EngineFactory>,
    pub config: Arc<Config>,
    pub metrics: Metrics,
}

enum WorkerExit {
    Recycle,
    Shutdown,
}

/// Handle to the running pool.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.worker.count` supervised workers.
    pub fn spawn(deps: WorkerDeps) -> Self {
        let (shutdown, _) = watch::channel(false);
        let count = deps.config.worker.count;

        let handles = (0..count)
            .map(|slot| {
                let deps = deps.clone();
                let rx = shutdown.subscribe();
                tokio::spawn(supervise(slot, deps, rx))
            })
            .collect();

        info!(workers = count, "worker pool started");
        Self { shutdown, handles }
    }

    /// Signal all workers to stop and wait for them to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Per-slot supervisor: respawns the worker loop every time it recycles.
async fn supervise(slot: usize, deps: WorkerDeps, mut shutdown: watch::Receiver<bool>) {
    let mut incarnation = 0usize;
    loop {
        match worker_loop(slot, incarnation, &deps, &mut shutdown).await {
            WorkerExit::Recycle => {
                deps.metrics.record_worker_recycled();
                info!(slot, incarnation, "recycling worker");
                incarnation += 1;
            }
            WorkerExit::Shutdown => {
                info!(slot, "worker shut down");
                return;
            }
        }
    }
}

async fn worker_loop(
    slot: usize,
    incarnation: usize,
    deps: &WorkerDeps,
    shutdown: &mut watch::Receiver<bool>,
) -> WorkerExit {
    let mut jobs_done = 0usize;

    loop {
        if *shutdown.borrow() {
            return WorkerExit::Shutdown;
        }

        let leased = match deps.queue.reserve().await {
            Ok(leased) => leased,
            Err(e) => {
                warn!(slot, error = %e, "queue reserve failed");
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        let Some(job) = leased else {
            tokio::select! {
                _ = shutdown.changed() => return WorkerExit::Shutdown,
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
            continue;
        };

        if job.attempt > 1 {
            deps.metrics.record_redelivery();
            info!(slot, job = %job.job_id, attempt = job.attempt, "running redelivered page job");
        }

        let result = run_page_job(
            &job.spec,
            deps.store.as_ref(),
            deps.factory.as_ref(),
            &deps.config,
        )
        .await;
        deps.metrics.record_job(job.spec.engine_name(), result.outcome);

        // Acknowledge only now that the job has a terminal outcome.
        if let Err(e) = deps.queue.ack(job.job_id, result).await {
            warn!(slot, job = %job.job_id, error = %e, "ack failed");
        }

        finalize_batch_if_terminal(deps, job.batch_id).await;

        jobs_done += 1;
        if jobs_done >= deps.config.worker.max_jobs {
            info!(slot, incarnation, jobs_done, "worker reached its job budget");
            return WorkerExit::Recycle;
        }
        if let Some(rss_mb) = mem::resident_memory_mb() {
            if rss_mb > deps.config.worker.max_rss_mb {
                warn!(slot, rss_mb, ceiling = deps.config.worker.max_rss_mb,
                    "worker exceeded memory ceiling");
                return WorkerExit::Recycle;
            }
        }
    }
}

/// Completion callback: when the batch this job belonged to has reached a
/// terminal state, clear its registry trace.
async fn finalize_batch_if_terminal(deps: &WorkerDeps, batch: BatchId) {
    match deps.queue.group_status(batch).await {
        Ok(Some(group)) => {
            let status = aggregate(&group);
            if status.state.is_terminal() {
                info!(
                    batch = %batch,
                    state = status.state.as_str(),
                    completed = status.completed,
                    "batch reached terminal state"
                );
                clear_entry_for_task(deps.registry.as_ref(), &batch.to_string()).await;
            }
        }
        Ok(None) => {}
        Err(e) => warn!(batch = %batch, error = %e, "group status check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BatchConfig, EngineConfig, ServerConfig, WorkerConfig};
    use crate::core::errors::EngineResult;
    use crate::core::types::{BatchState, JobSpec};
    use crate::queue::MemoryQueue;
    use crate::services::engines::{
        EngineDescriptor, Lang, OcrEngine, OcrEngineKind, TranslationEngine,
        TranslationEngineKind, GOOGLE_OCR_DESCRIPTOR, GOOGLE_TRANSLATE_DESCRIPTOR,
    };
    use crate::services::registry::MemoryRegistry;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct StubOcr;

    #[async_trait]
    impl OcrEngine for StubOcr {
        fn descriptor(&self) -> &EngineDescriptor {
            &GOOGLE_OCR_DESCRIPTOR
        }

        async fn recognize(
            &self,
            _image: &[u8],
            _lang: Lang,
            _secondary: Option<Lang>,
        ) -> EngineResult<String> {
            Ok("text".to_string())
        }
    }

    struct StubTranslate;

    #[async_trait]
    impl TranslationEngine for StubTranslate {
        fn descriptor(&self) -> &EngineDescriptor {
            &GOOGLE_TRANSLATE_DESCRIPTOR
        }

        async fn translate(&self, segment: &str, _s: Lang, _t: Lang) -> EngineResult<String> {
            Ok(segment.to_string())
        }
    }

    struct StubFactory;

    impl EngineFactory for StubFactory {
        fn ocr(&self, _kind: OcrEngineKind) -> EngineResult<Arc<dyn OcrEngine>> {
            Ok(Arc::new(StubOcr))
        }

        fn translation(
            &self,
            _kind: TranslationEngineKind,
        ) -> EngineResult<Arc<dyn TranslationEngine>> {
            Ok(Arc::new(StubTranslate))
        }
    }

    fn test_config(worker_count: usize, max_jobs: usize) -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: tracing::Level::INFO,
            },
            worker: WorkerConfig {
                count: worker_count,
                max_jobs,
                max_rss_mb: 1_000_000,
                queue_lease_secs: 300,
            },
            engine: EngineConfig {
                google_api_key: None,
                openai_api_key: None,
                openai_model: "gpt-4o-mini".to_string(),
                tesseract_bin: "tesseract".to_string(),
                local_model_path: "models/line_ocr.onnx".to_string(),
                local_vocab_path: "models/line_ocr_vocab.txt".to_string(),
                timeout_secs: 5,
                max_image_dim: 2048,
            },
            batch: BatchConfig {
                segment_max_len: 1000,
                registry_ttl_secs: 86_400,
                bot_author: "scriptorium-bot".to_string(),
            },
        }
    }

    fn deps(worker_count: usize, max_jobs: usize) -> (WorkerDeps, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let deps = WorkerDeps {
            queue: Arc::new(MemoryQueue::new(Duration::from_secs(300))),
            store: store.clone(),
            registry: Arc::new(MemoryRegistry::new()),
            factory: Arc::new(StubFactory),
            config: Arc::new(test_config(worker_count, max_jobs)),
            metrics: Metrics::new(),
        };
        (deps, store)
    }

    async fn wait_for_terminal(queue: &dyn JobQueue, batch: BatchId) -> BatchState {
        for _ in 0..100 {
            if let Some(group) = queue.group_status(batch).await.unwrap() {
                let status = aggregate(&group);
                if status.state.is_terminal() {
                    return status.state;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("batch never reached a terminal state");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pool_drains_a_batch_and_cleans_the_registry() {
        let (deps, store) = deps(2, 50);
        for i in 0..5 {
            store.add_page("p", &i.to_string(), Some(vec![0]));
        }

        let batch = BatchId::new();
        for i in 0..5 {
            deps.queue
                .enqueue(
                    batch,
                    JobSpec::Ocr {
                        project: "p".to_string(),
                        page: i.to_string(),
                        engine: OcrEngineKind::Google,
                        language: Lang::Sa,
                        secondary: None,
                    },
                )
                .await
                .unwrap();
        }
        deps.registry
            .put(
                "ocr_task:p",
                &serde_json::to_string(&crate::core::types::TaskRegistryEntry {
                    task_id: batch.to_string(),
                    engine: "google".to_string(),
                    started_at: chrono::Utc::now(),
                    project_slug: "p".to_string(),
                })
                .unwrap(),
                Duration::from_secs(86_400),
            )
            .await
            .unwrap();

        let pool = WorkerPool::spawn(deps.clone());
        let state = wait_for_terminal(deps.queue.as_ref(), batch).await;
        assert_eq!(state, BatchState::Success);

        // Completion callback removed the registry trace.
        for _ in 0..50 {
            if deps.registry.get("ocr_task:p").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(deps.registry.get("ocr_task:p").await.unwrap().is_none());

        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_recycles_after_job_budget() {
        let (deps, store) = deps(1, 1);
        for i in 0..3 {
            store.add_page("p", &i.to_string(), Some(vec![0]));
        }

        let batch = BatchId::new();
        for i in 0..3 {
            deps.queue
                .enqueue(
                    batch,
                    JobSpec::Ocr {
                        project: "p".to_string(),
                        page: i.to_string(),
                        engine: OcrEngineKind::Google,
                        language: Lang::Sa,
                        secondary: None,
                    },
                )
                .await
                .unwrap();
        }

        let pool = WorkerPool::spawn(deps.clone());
        let state = wait_for_terminal(deps.queue.as_ref(), batch).await;
        assert_eq!(state, BatchState::Success);

        // One job per incarnation: the supervisor must have replaced the
        // worker at least twice to drain three jobs.
        assert!(deps.metrics.workers_recycled() >= 2);

        pool.shutdown().await;
    }
}
