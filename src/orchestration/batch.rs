// Batch orchestrator: fans one project-level request out into per-page jobs
//
// Aggregation is a pure function over the queue's group counters. The
// orchestrator never tracks completion itself, so it tolerates page jobs
// finishing in any order and can run on any thread.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::errors::OrchestrateError;
use crate::core::types::{
    BatchId, BatchJob, BatchKind, BatchState, BatchStatus, GroupStatus, JobSpec,
    TaskRegistryEntry,
};
use crate::queue::JobQueue;
use crate::services::engines::{Lang, OcrEngineKind, TranslationEngineKind};
use crate::services::registry::TaskRegistry;
use crate::store::DocumentStore;
use crate::utils::Metrics;

/// Handle returned to the caller who started a batch.
#[derive(Debug, Clone, Copy)]
pub struct StartedBatch {
    pub task_id: BatchId,
    pub total: usize,
}

/// Fold the queue's group counters into the client-facing progress view.
///
/// The aggregate is terminal exactly when every page job has reported,
/// whatever the mix of outcomes. Skips count as benign completions, so a
/// batch with zero failures classifies as `SUCCESS`.
pub fn aggregate(group: &GroupStatus) -> BatchStatus {
    let completed = group.completed();
    let total = group.total;

    let state = if completed == 0 {
        BatchState::Pending
    } else if completed < total {
        BatchState::Progress
    } else if group.failed == 0 {
        BatchState::Success
    } else if group.failed == completed {
        BatchState::Failure
    } else {
        BatchState::PartialFailure
    };

    BatchStatus {
        state,
        completed,
        total,
        progress: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        },
    }
}

/// Start an OCR batch over every unedited page of the project.
///
/// Returns `None` when the project has no OCR-eligible pages; no batch is
/// created and no registry entry is written.
#[allow(clippy::too_many_arguments)]
pub async fn start_ocr_batch(
    store: &dyn DocumentStore,
    queue: &dyn JobQueue,
    registry: &dyn TaskRegistry,
    config: &Config,
    metrics: &Metrics,
    project: &str,
    engine: OcrEngineKind,
    language: Lang,
    secondary: Option<Lang>,
) -> Result<Option<StartedBatch>, OrchestrateError> {
    let pages = store.list_pages(project).await?;
    let eligible: Vec<String> = pages
        .iter()
        .filter(|p| p.version == 0)
        .map(|p| p.slug.clone())
        .collect();

    if eligible.is_empty() {
        info!(project, "no unedited pages, skipping OCR batch");
        return Ok(None);
    }

    let batch = BatchJob {
        id: BatchId::new(),
        project: project.to_string(),
        kind: BatchKind::Ocr,
        engine: engine.as_str(),
        created_at: Utc::now(),
        pages: eligible,
    };

    for page in &batch.pages {
        queue
            .enqueue(
                batch.id,
                JobSpec::Ocr {
                    project: batch.project.clone(),
                    page: page.clone(),
                    engine,
                    language,
                    secondary,
                },
            )
            .await?;
    }

    write_registry_entry(registry, &batch, config.registry_ttl()).await;
    metrics.record_batch_started();
    info!(
        project,
        task_id = %batch.id,
        engine = batch.engine,
        pages = batch.pages.len(),
        "OCR batch started"
    );

    Ok(Some(StartedBatch {
        task_id: batch.id,
        total: batch.pages.len(),
    }))
}

/// Start a translation batch over every page that has at least one revision.
#[allow(clippy::too_many_arguments)]
pub async fn start_translation_batch(
    store: &dyn DocumentStore,
    queue: &dyn JobQueue,
    registry: &dyn TaskRegistry,
    config: &Config,
    metrics: &Metrics,
    project: &str,
    engine: TranslationEngineKind,
    source: Lang,
    target: Lang,
) -> Result<Option<StartedBatch>, OrchestrateError> {
    let pages = store.list_pages(project).await?;

    let mut eligible = Vec::new();
    for page in &pages {
        if store.latest_revision(project, &page.slug).await?.is_some() {
            eligible.push(page.slug.clone());
        }
    }

    if eligible.is_empty() {
        info!(project, "no pages with revisions, skipping translation batch");
        return Ok(None);
    }

    let batch = BatchJob {
        id: BatchId::new(),
        project: project.to_string(),
        kind: BatchKind::Translation,
        engine: engine.as_str(),
        created_at: Utc::now(),
        pages: eligible,
    };

    for page in &batch.pages {
        queue
            .enqueue(
                batch.id,
                JobSpec::Translate {
                    project: batch.project.clone(),
                    page: page.clone(),
                    engine,
                    source,
                    target,
                },
            )
            .await?;
    }

    write_registry_entry(registry, &batch, config.registry_ttl()).await;
    metrics.record_batch_started();
    info!(
        project,
        task_id = %batch.id,
        engine = batch.engine,
        pages = batch.pages.len(),
        "translation batch started"
    );

    Ok(Some(StartedBatch {
        task_id: batch.id,
        total: batch.pages.len(),
    }))
}

/// Record the new batch in the registry. A new batch overwrites any prior
/// entry for the project. Purely advisory: a failed write degrades the
/// resume view, never the batch itself.
async fn write_registry_entry(registry: &dyn TaskRegistry, batch: &BatchJob, ttl: Duration) {
    let entry = TaskRegistryEntry {
        task_id: batch.id.to_string(),
        engine: batch.engine.to_string(),
        started_at: batch.created_at,
        project_slug: batch.project.clone(),
    };

    let key = batch.kind.registry_key(&batch.project);
    match serde_json::to_string(&entry) {
        Ok(value) => {
            if let Err(e) = registry.put(&key, &value, ttl).await {
                warn!(key, error = %e, "registry write failed, batch will run untracked");
            }
        }
        Err(e) => warn!(key, error = %e, "failed to serialize registry entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(total: usize, succeeded: usize, failed: usize, skipped: usize) -> GroupStatus {
        GroupStatus {
            total,
            succeeded,
            failed,
            skipped,
        }
    }

    #[test]
    fn test_aggregate_pending_until_first_report() {
        let status = aggregate(&group(10, 0, 0, 0));
        assert_eq!(status.state, BatchState::Pending);
        assert_eq!(status.progress, 0.0);
    }

    #[test]
    fn test_aggregate_progress_fraction() {
        let status = aggregate(&group(10, 3, 0, 0));
        assert_eq!(status.state, BatchState::Progress);
        assert_eq!(status.completed, 3);
        assert_eq!(status.total, 10);
        assert!((status.progress - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_terminal_iff_all_reported() {
        for completed in 0..10 {
            let status = aggregate(&group(10, completed, 0, 0));
            assert!(!status.state.is_terminal(), "terminal at {completed}/10");
        }
        assert!(aggregate(&group(10, 10, 0, 0)).state.is_terminal());
    }

    #[test]
    fn test_aggregate_classification() {
        assert_eq!(aggregate(&group(4, 4, 0, 0)).state, BatchState::Success);
        assert_eq!(aggregate(&group(4, 0, 4, 0)).state, BatchState::Failure);
        assert_eq!(
            aggregate(&group(4, 2, 1, 1)).state,
            BatchState::PartialFailure
        );
        // Skips are benign: no failures means success.
        assert_eq!(aggregate(&group(4, 2, 0, 2)).state, BatchState::Success);
        assert_eq!(aggregate(&group(4, 0, 0, 4)).state, BatchState::Success);
    }

    #[test]
    fn test_aggregate_mixed_order_independence() {
        // Counters carry no ordering, so any interleaving with the same
        // totals yields the same status.
        let a = aggregate(&group(6, 2, 1, 1));
        let b = aggregate(&group(6, 2, 1, 1));
        assert_eq!(a, b);
        assert_eq!(a.completed, 4);
    }
}
