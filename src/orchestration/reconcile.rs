// Status reconciliation: decide what the processing view should show
//
// Runs on every visit to a project's processing page. The registry entry is
// only a hint; the queue's job status is cross-checked before anything is
// shown, and stale or corrupt entries are deleted on sight. Every failure
// path degrades to the normal untracked view; reconciliation never blocks
// or breaks the page.

use tracing::{info, warn};

use crate::core::types::{BatchId, BatchKind, BatchStatus, TaskRegistryEntry};
use crate::orchestration::batch::aggregate;
use crate::queue::JobQueue;
use crate::services::registry::TaskRegistry;
use crate::utils::Metrics;

/// What the processing view should render.
#[derive(Debug, Clone)]
pub enum ProcessingView {
    /// A live batch was found; show the recovered progress view.
    Tracking {
        entry: TaskRegistryEntry,
        status: BatchStatus,
    },
    /// No live batch; show the normal view.
    Untracked,
}

impl ProcessingView {
    pub fn is_tracking(&self) -> bool {
        matches!(self, ProcessingView::Tracking { .. })
    }
}

/// Reconcile the registry hint for `project` against the queue.
pub async fn reconcile(
    registry: &dyn TaskRegistry,
    queue: &dyn JobQueue,
    metrics: &Metrics,
    project: &str,
    kind: BatchKind,
) -> ProcessingView {
    let key = kind.registry_key(project);

    let raw = match registry.get(&key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return ProcessingView::Untracked,
        Err(e) => {
            // The registry being down must never block the page.
            warn!(key, error = %e, "registry unreachable, rendering untracked view");
            metrics.record_registry_fallback();
            return ProcessingView::Untracked;
        }
    };

    let entry: TaskRegistryEntry = match serde_json::from_str(&raw) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key, error = %e, "malformed registry entry, deleting");
            delete_quietly(registry, &key).await;
            return ProcessingView::Untracked;
        }
    };

    let batch_id: BatchId = match entry.task_id.parse() {
        Ok(id) => id,
        Err(e) => {
            warn!(key, error = %e, "registry entry has an invalid task id, deleting");
            delete_quietly(registry, &key).await;
            return ProcessingView::Untracked;
        }
    };

    let group = match queue.group_status(batch_id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            // The queue has no record of this batch (e.g. queue state was
            // reset). Treat as terminal.
            info!(key, task_id = %batch_id, "job id unknown to the queue, deleting entry");
            delete_quietly(registry, &key).await;
            return ProcessingView::Untracked;
        }
        Err(e) => {
            warn!(key, error = %e, "queue status check failed, rendering untracked view");
            return ProcessingView::Untracked;
        }
    };

    let status = aggregate(&group);
    if status.state.is_terminal() {
        delete_quietly(registry, &key).await;
        return ProcessingView::Untracked;
    }

    ProcessingView::Tracking { entry, status }
}

/// Completion callback: once a batch reaches a terminal state, remove the
/// matching registry entry so reconciliation does not have to do so
/// reactively.
///
/// Entries are naturally keyed by project, so this resolves the task id by
/// prefix scan. Fine while the number of concurrently tracked batches stays
/// small; an index keyed by task id would remove the scan.
pub async fn clear_entry_for_task(registry: &dyn TaskRegistry, task_id: &str) {
    for kind in [BatchKind::Ocr, BatchKind::Translation] {
        let prefix = kind.registry_prefix();
        let entries = match registry.scan_prefix(prefix).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(prefix, error = %e, "registry scan failed during completion cleanup");
                return;
            }
        };

        for (key, value) in entries {
            let Ok(entry) = serde_json::from_str::<TaskRegistryEntry>(&value) else {
                continue;
            };
            if entry.task_id == task_id {
                delete_quietly(registry, &key).await;
                return;
            }
        }
    }
}

async fn delete_quietly(registry: &dyn TaskRegistry, key: &str) {
    if let Err(e) = registry.delete(key).await {
        warn!(key, error = %e, "registry delete failed");
    }
}
