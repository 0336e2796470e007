// External task registry: an ephemeral, TTL-bearing key-value index
//
// One entry per project, recording which batch is currently active. The
// registry is an optimization for resuming the progress view after the
// requester navigates away; it may be stale, missing, or corrupted without
// affecting correctness. The queue, never the registry, is authoritative for
// job existence and state.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::errors::RegistryResult;

#[cfg(test)]
use crate::core::errors::RegistryError;

/// Key-value capability backing the task registry.
///
/// Values are opaque strings (JSON on the wire); parsing stays with the
/// caller so a corrupt value can be detected and purged. Writes are
/// whole-value overwrites with last-write-wins semantics. The TTL is applied
/// at write time and never refreshed by reads.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> RegistryResult<()>;

    async fn get(&self, key: &str) -> RegistryResult<Option<String>>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> RegistryResult<()>;

    /// All live entries whose key starts with `prefix`. Used only for
    /// completion cleanup, which is keyed by job id rather than project.
    async fn scan_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, String)>>;
}

struct StoredEntry {
    value: String,
    expires_at: Instant,
}

/// In-process registry backend with per-entry deadlines.
///
/// Expiry is enforced on every read and scan, so entries vanish on schedule
/// regardless of whether any cleanup logic ever runs.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRegistry for MemoryRegistry {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> RegistryResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> RegistryResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, String)>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.expires_at > now);
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}

/// Registry stub that always fails, for exercising degraded-mode paths.
#[cfg(test)]
pub struct UnavailableRegistry;

#[cfg(test)]
#[async_trait]
impl TaskRegistry for UnavailableRegistry {
    async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> RegistryResult<()> {
        Err(RegistryError::Unavailable {
            detail: "connection refused".to_string(),
        })
    }

    async fn get(&self, _key: &str) -> RegistryResult<Option<String>> {
        Err(RegistryError::Unavailable {
            detail: "connection refused".to_string(),
        })
    }

    async fn delete(&self, _key: &str) -> RegistryResult<()> {
        Err(RegistryError::Unavailable {
            detail: "connection refused".to_string(),
        })
    }

    async fn scan_prefix(&self, _prefix: &str) -> RegistryResult<Vec<(String, String)>> {
        Err(RegistryError::Unavailable {
            detail: "connection refused".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let registry = MemoryRegistry::new();
        registry
            .put("ocr_task:my-project", r#"{"task_id":"t1"}"#, DAY)
            .await
            .unwrap();

        let value = registry.get("ocr_task:my-project").await.unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"task_id":"t1"}"#));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let registry = MemoryRegistry::new();
        registry
            .put("ocr_task:p", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.get("ocr_task:p").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_double_delete_is_idempotent() {
        let registry = MemoryRegistry::new();
        registry.put("ocr_task:p", "v", DAY).await.unwrap();

        registry.delete("ocr_task:p").await.unwrap();
        // Second delete must not fail and leaves the store unchanged.
        registry.delete("ocr_task:p").await.unwrap();
        assert_eq!(registry.get("ocr_task:p").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_is_last_write_wins() {
        let registry = MemoryRegistry::new();
        registry.put("ocr_task:p", "old", DAY).await.unwrap();
        registry.put("ocr_task:p", "new", DAY).await.unwrap();
        assert_eq!(registry.get("ocr_task:p").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_scan_prefix_filters_and_skips_expired() {
        let registry = MemoryRegistry::new();
        registry.put("ocr_task:a", "1", DAY).await.unwrap();
        registry.put("ocr_task:b", "2", Duration::from_millis(5)).await.unwrap();
        registry.put("translation_task:a", "3", DAY).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut entries = registry.scan_prefix("ocr_task:").await.unwrap();
        entries.sort();
        assert_eq!(entries, vec![("ocr_task:a".to_string(), "1".to_string())]);
    }
}
