pub mod engines;
pub mod registry;
pub mod segmentation;

pub use engines::{EngineFactory, OcrEngine, ProviderFactory, TranslationEngine};
pub use registry::{MemoryRegistry, TaskRegistry};
pub use segmentation::{segment, TextSegment};
