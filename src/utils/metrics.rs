use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::core::types::PageOutcome;

/// Global metrics collector for the application.
///
/// Tracks batch and page-job throughput, queue redeliveries, worker
/// recycling, and registry degradations. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    batches_started: AtomicUsize,
    jobs_processed: AtomicUsize,
    jobs_succeeded: AtomicUsize,
    jobs_failed: AtomicUsize,
    jobs_skipped: AtomicUsize,
    jobs_redelivered: AtomicUsize,
    workers_recycled: AtomicUsize,
    registry_fallbacks: AtomicUsize,

    // Per-engine job counters
    engine_jobs: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

/// Point-in-time view of all counters, serializable for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub batches_started: usize,
    pub jobs_processed: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub jobs_redelivered: usize,
    pub workers_recycled: usize,
    pub registry_fallbacks: usize,
    pub engine_jobs: std::collections::BTreeMap<String, usize>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                batches_started: AtomicUsize::new(0),
                jobs_processed: AtomicUsize::new(0),
                jobs_succeeded: AtomicUsize::new(0),
                jobs_failed: AtomicUsize::new(0),
                jobs_skipped: AtomicUsize::new(0),
                jobs_redelivered: AtomicUsize::new(0),
                workers_recycled: AtomicUsize::new(0),
                registry_fallbacks: AtomicUsize::new(0),
                engine_jobs: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_batch_started(&self) {
        self.inner.batches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job(&self, engine: &str, outcome: PageOutcome) {
        self.inner.jobs_processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            PageOutcome::Success => self.inner.jobs_succeeded.fetch_add(1, Ordering::Relaxed),
            PageOutcome::Failure => self.inner.jobs_failed.fetch_add(1, Ordering::Relaxed),
            PageOutcome::Skipped => self.inner.jobs_skipped.fetch_add(1, Ordering::Relaxed),
        };
        self.inner
            .engine_jobs
            .entry(engine.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redelivery(&self) {
        self.inner.jobs_redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_recycled(&self) {
        self.inner.workers_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registry_fallback(&self) {
        self.inner.registry_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn workers_recycled(&self) -> usize {
        self.inner.workers_recycled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let engine_jobs = self
            .inner
            .engine_jobs
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
            batches_started: self.inner.batches_started.load(Ordering::Relaxed),
            jobs_processed: self.inner.jobs_processed.load(Ordering::Relaxed),
            jobs_succeeded: self.inner.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.inner.jobs_failed.load(Ordering::Relaxed),
            jobs_skipped: self.inner.jobs_skipped.load(Ordering::Relaxed),
            jobs_redelivered: self.inner.jobs_redelivered.load(Ordering::Relaxed),
            workers_recycled: self.inner.workers_recycled.load(Ordering::Relaxed),
            registry_fallbacks: self.inner.registry_fallbacks.load(Ordering::Relaxed),
            engine_jobs,
        }
    }

    /// Render all counters in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        out.push_str(&format!(
            "# HELP scriptorium_uptime_seconds Server uptime\n\
             # TYPE scriptorium_uptime_seconds gauge\n\
             scriptorium_uptime_seconds {}\n",
            s.uptime_seconds
        ));
        out.push_str(&format!(
            "# HELP scriptorium_batches_started_total Batches fanned out\n\
             # TYPE scriptorium_batches_started_total counter\n\
             scriptorium_batches_started_total {}\n",
            s.batches_started
        ));
        out.push_str(&format!(
            "# HELP scriptorium_jobs_processed_total Page jobs by outcome\n\
             # TYPE scriptorium_jobs_processed_total counter\n\
             scriptorium_jobs_processed_total{{outcome=\"success\"}} {}\n\
             scriptorium_jobs_processed_total{{outcome=\"failure\"}} {}\n\
             scriptorium_jobs_processed_total{{outcome=\"skipped\"}} {}\n",
            s.jobs_succeeded, s.jobs_failed, s.jobs_skipped
        ));
        out.push_str(&format!(
            "# HELP scriptorium_jobs_redelivered_total Lease-expired redeliveries\n\
             # TYPE scriptorium_jobs_redelivered_total counter\n\
             scriptorium_jobs_redelivered_total {}\n",
            s.jobs_redelivered
        ));
        out.push_str(&format!(
            "# HELP scriptorium_workers_recycled_total Worker recycle events\n\
             # TYPE scriptorium_workers_recycled_total counter\n\
             scriptorium_workers_recycled_total {}\n",
            s.workers_recycled
        ));
        out.push_str(&format!(
            "# HELP scriptorium_registry_fallbacks_total Untracked-mode degradations\n\
             # TYPE scriptorium_registry_fallbacks_total counter\n\
             scriptorium_registry_fallbacks_total {}\n",
            s.registry_fallbacks
        ));
        for (engine, count) in &s.engine_jobs {
            out.push_str(&format!(
                "scriptorium_engine_jobs_total{{engine=\"{engine}\"}} {count}\n"
            ));
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
