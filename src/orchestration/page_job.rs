// Page job: one provider invocation for one page
//
// A page job never raises: every failure is absorbed into its
// `PageJobResult` so one bad page cannot abort its siblings. Re-running a
// job simply appends another revision, which keeps execution safe under the
// queue's at-least-once redelivery.

use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::types::{JobSpec, PageJobResult};
use crate::services::engines::{
    EngineFactory, Lang, OcrEngine, OcrEngineKind, TranslationEngine, TranslationEngineKind,
};
use crate::services::segmentation::segment;
use crate::store::DocumentStore;

/// Execute one page job to a terminal outcome.
///
/// The engine adapter is resolved once here, at job start, and released
/// after the invocation regardless of outcome.
pub async fn run_page_job(
    spec: &JobSpec,
    store: &dyn DocumentStore,
    factory: &dyn EngineFactory,
    config: &Config,
) -> PageJobResult {
    match spec {
        JobSpec::Ocr {
            project,
            page,
            engine,
            language,
            secondary,
        } => {
            let adapter = match factory.ocr(*engine) {
                Ok(adapter) => adapter,
                Err(e) => {
                    return PageJobResult::failure(page, format!("[{}] {e}", e.reason_code()))
                }
            };
            let result = ocr_page(
                adapter.as_ref(),
                store,
                config,
                project,
                page,
                *engine,
                *language,
                *secondary,
            )
            .await;
            adapter.release().await;
            result
        }
        JobSpec::Translate {
            project,
            page,
            engine,
            source,
            target,
        } => {
            let adapter = match factory.translation(*engine) {
                Ok(adapter) => adapter,
                Err(e) => {
                    return PageJobResult::failure(page, format!("[{}] {e}", e.reason_code()))
                }
            };
            translate_page(
                adapter.as_ref(),
                store,
                config,
                project,
                page,
                *engine,
                *source,
                *target,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn ocr_page(
    engine: &dyn OcrEngine,
    store: &dyn DocumentStore,
    config: &Config,
    project: &str,
    page: &str,
    kind: OcrEngineKind,
    language: Lang,
    secondary: Option<Lang>,
) -> PageJobResult {
    let image = match store.page_image(project, page).await {
        Ok(image) => image,
        Err(e) => return PageJobResult::failure(page, e.to_string()),
    };

    let text = match engine.recognize(&image, language, secondary).await {
        Ok(text) => text,
        Err(e) => return PageJobResult::failure(page, format!("[{}] {e}", e.reason_code())),
    };

    let summary = format!("Run OCR ({}, {language})", kind.as_str());
    match store
        .create_revision(project, page, &text, &config.batch.bot_author, &summary)
        .await
    {
        Ok(revision) => {
            debug!(project, page, revision = revision.0, "OCR revision created");
            PageJobResult::success(page, revision)
        }
        Err(e) => PageJobResult::failure(page, e.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn translate_page(
    engine: &dyn TranslationEngine,
    store: &dyn DocumentStore,
    config: &Config,
    project: &str,
    page: &str,
    kind: TranslationEngineKind,
    source: Lang,
    target: Lang,
) -> PageJobResult {
    let revision = match store.latest_revision(project, page).await {
        Ok(Some(revision)) => revision,
        Ok(None) => {
            return PageJobResult::failure(page, format!("no revisions found for page '{page}'"))
        }
        Err(e) => return PageJobResult::failure(page, e.to_string()),
    };

    let summary = format!("Translate ({}, {source}->{target})", kind.as_str());

    // Already translated with the same engine and language pair: nothing to
    // do for this page.
    if revision.author == config.batch.bot_author && revision.summary == summary {
        debug!(project, page, "translation already present, skipping");
        return PageJobResult::skipped(page);
    }

    let bound = config
        .batch
        .segment_max_len
        .min(engine.descriptor().max_payload);
    let segments = segment(&revision.content, bound);

    let mut translated = Vec::with_capacity(segments.len());
    let mut attempted = 0usize;
    let mut failed = 0usize;
    let mut last_error = String::new();

    for seg in &segments {
        if seg.text.trim().is_empty() {
            translated.push(seg.text.clone());
            continue;
        }
        attempted += 1;
        match engine.translate(&seg.text, source, target).await {
            Ok(text) => translated.push(text),
            Err(e) => {
                failed += 1;
                last_error = format!("[{}] {e}", e.reason_code());
                warn!(project, page, error = %e, "segment translation failed, keeping source text");
                translated.push(seg.text.clone());
            }
        }
    }

    if attempted > 0 && failed == attempted {
        return PageJobResult::failure(page, last_error);
    }

    let content = translated.join("\n\n");
    match store
        .create_revision(project, page, &content, &config.batch.bot_author, &summary)
        .await
    {
        Ok(revision) => PageJobResult::success(page, revision),
        Err(e) => PageJobResult::failure(page, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BatchConfig, EngineConfig, ServerConfig, WorkerConfig};
    use crate::core::errors::{EngineError, EngineResult};
    use crate::core::types::PageOutcome;
    use crate::services::engines::{EngineDescriptor, GOOGLE_OCR_DESCRIPTOR, GOOGLE_TRANSLATE_DESCRIPTOR};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: tracing::Level::INFO,
            },
            worker: WorkerConfig {
                count: 2,
                max_jobs: 50,
                max_rss_mb: 10_000,
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

    struct StubOcr {
        response: EngineResult<String>,
    }

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
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(EngineError::Timeout {
                    engine: "google",
                    seconds: 5,
                }),
            }
        }
    }

    struct StubTranslate {
        fail: bool,
    }

    #[async_trait]
    impl TranslationEngine for StubTranslate {
        fn descriptor(&self) -> &EngineDescriptor {
            &GOOGLE_TRANSLATE_DESCRIPTOR
        }

        async fn translate(
            &self,
            segment: &str,
            _source: Lang,
            _target: Lang,
        ) -> EngineResult<String> {
            if self.fail {
                Err(EngineError::Timeout {
                    engine: "google",
                    seconds: 5,
                })
            } else {
                Ok(segment.to_uppercase())
            }
        }
    }

    struct StubFactory {
        ocr_text: Option<String>,
        translate_fails: bool,
    }

    impl StubFactory {
        fn ok() -> Self {
            Self {
                ocr_text: Some("recognized text".to_string()),
                translate_fails: false,
            }
        }
    }

    impl EngineFactory for StubFactory {
        fn ocr(&self, _kind: OcrEngineKind) -> EngineResult<Arc<dyn OcrEngine>> {
            Ok(Arc::new(StubOcr {
                response: match &self.ocr_text {
                    Some(text) => Ok(text.clone()),
                    None => Err(EngineError::Timeout {
                        engine: "google",
                        seconds: 5,
                    }),
                },
            }))
        }

        fn translation(
            &self,
            _kind: TranslationEngineKind,
        ) -> EngineResult<Arc<dyn TranslationEngine>> {
            Ok(Arc::new(StubTranslate {
                fail: self.translate_fails,
            }))
        }
    }

    fn ocr_spec() -> JobSpec {
        JobSpec::Ocr {
            project: "my-project".to_string(),
            page: "1".to_string(),
            engine: OcrEngineKind::Google,
            language: Lang::Sa,
            secondary: None,
        }
    }

    fn translate_spec() -> JobSpec {
        JobSpec::Translate {
            project: "my-project".to_string(),
            page: "1".to_string(),
            engine: TranslationEngineKind::Google,
            source: Lang::Sa,
            target: Lang::En,
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_page("my-project", "1", Some(vec![1, 2, 3]));
        store
    }

    #[tokio::test]
    async fn test_ocr_success_persists_bot_revision() {
        let store = seeded_store();
        let config = test_config();

        let result = run_page_job(&ocr_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(result.outcome, PageOutcome::Success);
        assert!(result.revision.is_some());

        let revision = store.latest_revision("my-project", "1").await.unwrap().unwrap();
        assert_eq!(revision.content, "recognized text");
        assert_eq!(revision.author, "scriptorium-bot");
        assert_eq!(revision.summary, "Run OCR (google, sa)");
    }

    #[tokio::test]
    async fn test_ocr_is_safe_to_re_execute() {
        let store = seeded_store();
        let config = test_config();

        let first = run_page_job(&ocr_spec(), &store, &StubFactory::ok(), &config).await;
        let second = run_page_job(&ocr_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(first.outcome, PageOutcome::Success);
        assert_eq!(second.outcome, PageOutcome::Success);
        // Re-execution appends a fresh revision rather than mutating state.
        assert_ne!(first.revision, second.revision);
    }

    #[tokio::test]
    async fn test_ocr_engine_failure_is_recorded_not_raised() {
        let store = seeded_store();
        let config = test_config();
        let factory = StubFactory {
            ocr_text: None,
            translate_fails: false,
        };

        let result = run_page_job(&ocr_spec(), &store, &factory, &config).await;
        assert_eq!(result.outcome, PageOutcome::Failure);
        assert!(result.error.as_deref().unwrap().contains("[timeout]"));
        assert!(result.revision.is_none());
    }

    #[tokio::test]
    async fn test_ocr_missing_image_is_a_failure() {
        let store = MemoryStore::new();
        store.add_page("my-project", "1", None);
        let config = test_config();

        let result = run_page_job(&ocr_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(result.outcome, PageOutcome::Failure);
        assert!(result.error.as_deref().unwrap().contains("no image"));
    }

    #[tokio::test]
    async fn test_translation_success_and_rerun_skips() {
        let store = seeded_store();
        let config = test_config();
        store
            .create_revision("my-project", "1", "some text.", "proofer", "Edited")
            .await
            .unwrap();

        let first = run_page_job(&translate_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(first.outcome, PageOutcome::Success);

        let revision = store.latest_revision("my-project", "1").await.unwrap().unwrap();
        assert_eq!(revision.content, "SOME TEXT.");
        assert_eq!(revision.summary, "Translate (google, sa->en)");

        // The latest revision now carries this exact translation; re-running
        // the job short-circuits.
        let second = run_page_job(&translate_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(second.outcome, PageOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_translation_without_revisions_fails() {
        let store = seeded_store();
        let config = test_config();

        let result = run_page_job(&translate_spec(), &store, &StubFactory::ok(), &config).await;
        assert_eq!(result.outcome, PageOutcome::Failure);
        assert!(result.error.as_deref().unwrap().contains("no revisions"));
    }

    #[tokio::test]
    async fn test_translation_all_segments_failing_fails_the_page() {
        let store = seeded_store();
        let config = test_config();
        store
            .create_revision("my-project", "1", "some text.", "proofer", "Edited")
            .await
            .unwrap();
        let factory = StubFactory {
            ocr_text: None,
            translate_fails: true,
        };

        let result = run_page_job(&translate_spec(), &store, &factory, &config).await;
        assert_eq!(result.outcome, PageOutcome::Failure);
        assert!(result.error.as_deref().unwrap().contains("[timeout]"));
    }
}
