// Shared types for the batch processing workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::engines::{Lang, OcrEngineKind, TranslationEngineKind};

/// Identifier of a batch (one "process this project" request).
///
/// This is the id written into the task registry and used by the queue to
/// group page jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a single page job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a document revision produced by a page job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

/// The two batch flavors. Each flavor has its own registry key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Ocr,
    Translation,
}

impl BatchKind {
    pub fn registry_prefix(&self) -> &'static str {
        match self {
            BatchKind::Ocr => "ocr_task:",
            BatchKind::Translation => "translation_task:",
        }
    }

    pub fn registry_key(&self, project: &str) -> String {
        format!("{}{}", self.registry_prefix(), project)
    }
}

/// Specification of one page job. Plain data, JSON-compatible, so any queue
/// backend can carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Ocr {
        project: String,
        page: String,
        engine: OcrEngineKind,
        language: Lang,
        secondary: Option<Lang>,
    },
    Translate {
        project: String,
        page: String,
        engine: TranslationEngineKind,
        source: Lang,
        target: Lang,
    },
}

impl JobSpec {
    pub fn project(&self) -> &str {
        match self {
            JobSpec::Ocr { project, .. } => project,
            JobSpec::Translate { project, .. } => project,
        }
    }

    pub fn page(&self) -> &str {
        match self {
            JobSpec::Ocr { page, .. } => page,
            JobSpec::Translate { page, .. } => page,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        match self {
            JobSpec::Ocr { engine, .. } => engine.as_str(),
            JobSpec::Translate { engine, .. } => engine.as_str(),
        }
    }
}

/// Queue-side state of a single page job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Done,
}

/// A job handed to a worker, valid until acked or the lease expires.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub spec: JobSpec,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// Outcome of a single page job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Success,
    Failure,
    Skipped,
}

/// Result of one page job attempt. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageJobResult {
    pub page: String,
    /// Revision produced on success; absent on failure or skip.
    pub revision: Option<RevisionId>,
    pub outcome: PageOutcome,
    /// Error detail, present only when `outcome` is `Failure`.
    pub error: Option<String>,
}

impl PageJobResult {
    pub fn success(page: impl Into<String>, revision: RevisionId) -> Self {
        Self {
            page: page.into(),
            revision: Some(revision),
            outcome: PageOutcome::Success,
            error: None,
        }
    }

    pub fn failure(page: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            revision: None,
            outcome: PageOutcome::Failure,
            error: Some(error.into()),
        }
    }

    pub fn skipped(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            revision: None,
            outcome: PageOutcome::Skipped,
            error: None,
        }
    }
}

/// Aggregate state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Pending,
    Progress,
    Success,
    PartialFailure,
    Failure,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Success | BatchState::PartialFailure | BatchState::Failure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "PENDING",
            BatchState::Progress => "PROGRESS",
            BatchState::Success => "SUCCESS",
            BatchState::PartialFailure => "PARTIAL_FAILURE",
            BatchState::Failure => "FAILURE",
        }
    }
}

/// The progress view served to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub state: BatchState,
    pub completed: usize,
    pub total: usize,
    /// `completed / total` in `[0, 1]`.
    pub progress: f64,
}

/// Per-group counters maintained by the queue. The queue is authoritative
/// for these; the registry never is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStatus {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl GroupStatus {
    /// Terminal page jobs, regardless of outcome. Monotonically increasing,
    /// never exceeds `total`.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// A batch job record: one "process all pages of project P with engine E"
/// request. Created when orchestration starts; superseded by a new batch if
/// re-run.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: BatchId,
    pub project: String,
    pub kind: BatchKind,
    pub engine: &'static str,
    pub created_at: DateTime<Utc>,
    /// Ordered page identifiers fanned out into page jobs.
    pub pages: Vec<String>,
}

/// The wire shape of a task registry value. Serialized as JSON under the
/// `ocr_task:{project}` / `translation_task:{project}` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRegistryEntry {
    pub task_id: String,
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub project_slug: String,
}

/// A page listing entry from the document store.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub slug: String,
    /// 0 means the page has never been edited (OCR-eligible).
    pub version: u32,
}

/// A document revision. Append-only; re-running a page job simply adds
/// another revision.
#[derive(Debug, Clone)]
pub struct Revision {
    pub id: RevisionId,
    pub content: String,
    pub author: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_key_shape() {
        assert_eq!(
            BatchKind::Ocr.registry_key("my-project"),
            "ocr_task:my-project"
        );
        assert_eq!(
            BatchKind::Translation.registry_key("my-project"),
            "translation_task:my-project"
        );
    }

    #[test]
    fn test_registry_entry_wire_shape() {
        let entry = TaskRegistryEntry {
            task_id: "abc".to_string(),
            engine: "google".to_string(),
            started_at: "2026-01-15T10:00:00Z".parse().unwrap(),
            project_slug: "my-project".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["task_id"], "abc");
        assert_eq!(json["engine"], "google");
        assert_eq!(json["project_slug"], "my-project");
        assert_eq!(json["started_at"], "2026-01-15T10:00:00Z");
    }

    #[test]
    fn test_batch_state_terminality() {
        assert!(!BatchState::Pending.is_terminal());
        assert!(!BatchState::Progress.is_terminal());
        assert!(BatchState::Success.is_terminal());
        assert!(BatchState::PartialFailure.is_terminal());
        assert!(BatchState::Failure.is_terminal());
    }
}
