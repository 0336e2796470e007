// Custom error types for better error handling and debugging
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Automatic Display/Error trait implementations

use thiserror::Error;

/// Engine adapter errors.
///
/// Every provider failure surfaces as one of these variants; adapters never
/// leak provider-native error types past this boundary. `reason_code()` gives
/// a stable short identifier for logs and `PageJobResult` details.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("language '{lang}' is not supported by engine '{engine}'")]
    UnsupportedLanguage { engine: &'static str, lang: String },

    #[error("payload of {size} exceeds the limit of {limit} for engine '{engine}'")]
    PayloadTooLarge {
        engine: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("engine '{engine}' timed out after {seconds}s")]
    Timeout { engine: &'static str, seconds: u64 },

    #[error("engine '{engine}' rejected credentials: {detail}")]
    Auth { engine: &'static str, detail: String },

    #[error("transport failure calling engine '{engine}': {source}")]
    Transport {
        engine: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("engine '{engine}' failed: {detail}")]
    Provider { engine: &'static str, detail: String },

    #[error("invalid image payload: {0}")]
    Image(#[from] image::ImageError),
}

impl EngineError {
    /// Stable reason code carried into job results and logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::UnsupportedLanguage { .. } => "unsupported_language",
            EngineError::PayloadTooLarge { .. } => "payload_too_large",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Auth { .. } => "auth",
            EngineError::Transport { .. } => "transport",
            EngineError::Provider { .. } => "provider",
            EngineError::Image(_) => "invalid_image",
        }
    }
}

/// Task registry errors.
///
/// The registry is advisory: callers are expected to degrade on
/// `Unavailable`, never to fail a primary request because of it.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry store unreachable: {detail}")]
    Unavailable { detail: String },
}

/// Job queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} is not known to the queue")]
    UnknownJob(String),

    #[error("queue backend failure: {detail}")]
    Backend { detail: String },
}

/// Document store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("page '{page}' not found in project '{project}'")]
    PageNotFound { project: String, page: String },

    #[error("page '{page}' in project '{project}' has no image")]
    NoImage { project: String, page: String },

    #[error("document store failure: {detail}")]
    Backend { detail: String },
}

/// Control-plane failures while starting a batch. Registry trouble is NOT
/// represented here: registry writes are advisory and only logged.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be > 0, got {0}")]
    InvalidWorkerCount(usize),

    #[error("worker max jobs must be > 0, got {0}")]
    InvalidWorkerMaxJobs(usize),

    #[error("segment max length must be > 0, got {0}")]
    InvalidSegmentLength(usize),

    #[error("registry TTL must be > 0 seconds, got {0}")]
    InvalidRegistryTtl(u64),

    #[error("max image dimension must be between 320 and 8192, got {0}")]
    InvalidMaxImageDim(u32),

    #[error("environment variable parsing failed: {0}")]
    EnvVarError(String),
}

// Convenience type aliases for Results
pub type EngineResult<T> = Result<T, EngineError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type QueueResult<T> = Result<T, QueueError>;
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = EngineError::UnsupportedLanguage {
            engine: "tesseract",
            lang: "xx".to_string(),
        };
        assert_eq!(err.reason_code(), "unsupported_language");

        let err = EngineError::PayloadTooLarge {
            engine: "google",
            size: 10,
            limit: 5,
        };
        assert_eq!(err.reason_code(), "payload_too_large");
    }
}
