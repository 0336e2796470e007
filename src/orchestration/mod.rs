pub mod batch;
pub mod page_job;
pub mod reconcile;
pub mod worker;

pub use batch::{aggregate, start_ocr_batch, start_translation_batch, StartedBatch};
pub use page_job::run_page_job;
pub use reconcile::{clear_entry_for_task, reconcile, ProcessingView};
pub use worker::{WorkerDeps, WorkerPool};
