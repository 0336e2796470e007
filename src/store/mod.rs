// Document store contract
//
// The page/revision store and its version history are an external
// collaborator; the core only consumes this interface. `MemoryStore` is the
// in-process backend used by the binary and the tests.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{PageRecord, Revision, RevisionId};

/// Read and write access to pages and their revision history.
///
/// Revisions are append-only: re-running a page job simply creates another
/// revision, which is what makes page jobs safe under at-least-once
/// redelivery.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ordered page identifiers for a project.
    async fn list_pages(&self, project: &str) -> StoreResult<Vec<PageRecord>>;

    async fn page_image(&self, project: &str, page: &str) -> StoreResult<Vec<u8>>;

    async fn latest_revision(&self, project: &str, page: &str) -> StoreResult<Option<Revision>>;

    async fn create_revision(
        &self,
        project: &str,
        page: &str,
        content: &str,
        author: &str,
        summary: &str,
    ) -> StoreResult<RevisionId>;
}

struct PageEntry {
    slug: String,
    /// Proofing version: 0 until a human edits the page. Bot revisions do
    /// not advance it.
    version: u32,
    image: Option<Vec<u8>>,
    revisions: Vec<Revision>,
}

#[derive(Default)]
struct ProjectEntry {
    pages: Vec<PageEntry>,
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    projects: DashMap<String, ProjectEntry>,
    next_revision: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, slug: &str) {
        self.projects.entry(slug.to_string()).or_default();
    }

    /// Add an unedited page (version 0) with an optional scan image.
    pub fn add_page(&self, project: &str, page: &str, image: Option<Vec<u8>>) {
        let mut entry = self.projects.entry(project.to_string()).or_default();
        entry.pages.push(PageEntry {
            slug: page.to_string(),
            version: 0,
            image,
            revisions: Vec::new(),
        });
    }

    /// Mark a page as human-edited, taking it out of the OCR-eligible set.
    pub fn mark_page_edited(&self, project: &str, page: &str) {
        if let Some(mut entry) = self.projects.get_mut(project) {
            if let Some(p) = entry.pages.iter_mut().find(|p| p.slug == page) {
                p.version += 1;
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_pages(&self, project: &str) -> StoreResult<Vec<PageRecord>> {
        let entry = self
            .projects
            .get(project)
            .ok_or_else(|| StoreError::ProjectNotFound(project.to_string()))?;
        Ok(entry
            .pages
            .iter()
            .map(|p| PageRecord {
                slug: p.slug.clone(),
                version: p.version,
            })
            .collect())
    }

    async fn page_image(&self, project: &str, page: &str) -> StoreResult<Vec<u8>> {
        let entry = self
            .projects
            .get(project)
            .ok_or_else(|| StoreError::ProjectNotFound(project.to_string()))?;
        let p = entry
            .pages
            .iter()
            .find(|p| p.slug == page)
            .ok_or_else(|| StoreError::PageNotFound {
                project: project.to_string(),
                page: page.to_string(),
            })?;
        p.image.clone().ok_or_else(|| StoreError::NoImage {
            project: project.to_string(),
            page: page.to_string(),
        })
    }

    async fn latest_revision(&self, project: &str, page: &str) -> StoreResult<Option<Revision>> {
        let entry = self
            .projects
            .get(project)
            .ok_or_else(|| StoreError::ProjectNotFound(project.to_string()))?;
        let p = entry
            .pages
            .iter()
            .find(|p| p.slug == page)
            .ok_or_else(|| StoreError::PageNotFound {
                project: project.to_string(),
                page: page.to_string(),
            })?;
        Ok(p.revisions.last().cloned())
    }

    async fn create_revision(
        &self,
        project: &str,
        page: &str,
        content: &str,
        author: &str,
        summary: &str,
    ) -> StoreResult<RevisionId> {
        let mut entry = self
            .projects
            .get_mut(project)
            .ok_or_else(|| StoreError::ProjectNotFound(project.to_string()))?;
        let p = entry
            .pages
            .iter_mut()
            .find(|p| p.slug == page)
            .ok_or_else(|| StoreError::PageNotFound {
                project: project.to_string(),
                page: page.to_string(),
            })?;

        let id = RevisionId(self.next_revision.fetch_add(1, Ordering::Relaxed) + 1);
        p.revisions.push(Revision {
            id,
            content: content.to_string(),
            author: author.to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }
}
