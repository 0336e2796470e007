// Library exports for the batch OCR/translation workflow

// Core modules
pub mod core;
pub mod orchestration;
pub mod queue;
pub mod services;
pub mod store;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, EngineError, OrchestrateError, QueueError, RegistryError, StoreError},
    types::{
        BatchId, BatchJob, BatchKind, BatchState, BatchStatus, JobId, JobSpec, JobState,
        PageJobResult, PageOutcome, TaskRegistryEntry,
    },
};

pub use orchestration::{
    aggregate, reconcile, run_page_job, start_ocr_batch, start_translation_batch, ProcessingView,
    StartedBatch, WorkerDeps, WorkerPool,
};

pub use queue::{JobQueue, MemoryQueue};

pub use services::{
    engines::{EngineFactory, Lang, OcrEngineKind, ProviderFactory, TranslationEngineKind},
    registry::{MemoryRegistry, TaskRegistry},
    segmentation::{segment, TextSegment},
};

pub use store::{DocumentStore, MemoryStore};

pub use utils::Metrics;
