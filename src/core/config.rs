use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Worker pool configuration.
///
/// The pool is deliberately small: engine adapters that load native models
/// are memory-heavy, and workers are recycled to bound growth from provider
/// runtimes that do not release memory cleanly.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of pooled workers pulling page jobs.
    pub count: usize,
    /// Jobs a worker may process before it is recycled.
    pub max_jobs: usize,
    /// Process RSS ceiling in MB; exceeding it recycles the worker.
    pub max_rss_mb: u64,
    /// Redelivery window for reserved-but-unacked jobs.
    pub queue_lease_secs: u64,
}

/// Engine adapter configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub tesseract_bin: String,
    pub local_model_path: String,
    pub local_vocab_path: String,
    /// Per-call provider timeout.
    pub timeout_secs: u64,
    /// Images are downscaled to fit this dimension before inference.
    pub max_image_dim: u32,
}

/// Batch orchestration configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum characters per translation segment.
    pub segment_max_len: usize,
    /// Registry entry TTL, applied at write time and never refreshed.
    pub registry_ttl_secs: u64,
    /// System author recorded on revisions produced by page jobs.
    pub bot_author: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub engine: EngineConfig,
    pub batch: BatchConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1420),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            worker: WorkerConfig {
                count: env::var("WORKER_COUNT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                max_jobs: env::var("WORKER_MAX_JOBS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(50),
                max_rss_mb: env::var("WORKER_MAX_RSS_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(200),
                queue_lease_secs: env::var("QUEUE_LEASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            },
            engine: EngineConfig {
                google_api_key: env::var("GOOGLE_API_KEY").ok().filter(|s| !s.is_empty()),
                openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
                openai_model: env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                tesseract_bin: env::var("TESSERACT_BIN")
                    .unwrap_or_else(|_| "tesseract".to_string()),
                local_model_path: env::var("LOCAL_OCR_MODEL_PATH")
                    .unwrap_or_else(|_| "models/line_ocr.onnx".to_string()),
                local_vocab_path: env::var("LOCAL_OCR_VOCAB_PATH")
                    .unwrap_or_else(|_| "models/line_ocr_vocab.txt".to_string()),
                timeout_secs: env::var("ENGINE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
                max_image_dim: env::var("MAX_IMAGE_DIM")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2048),
            },
            batch: BatchConfig {
                segment_max_len: env::var("SEGMENT_MAX_LEN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
                registry_ttl_secs: env::var("REGISTRY_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
                bot_author: env::var("BOT_AUTHOR")
                    .unwrap_or_else(|_| "scriptorium-bot".to_string()),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.count == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.worker.count));
        }
        if self.worker.max_jobs == 0 {
            return Err(ConfigError::InvalidWorkerMaxJobs(self.worker.max_jobs));
        }
        if self.batch.segment_max_len == 0 {
            return Err(ConfigError::InvalidSegmentLength(self.batch.segment_max_len));
        }
        if self.batch.registry_ttl_secs == 0 {
            return Err(ConfigError::InvalidRegistryTtl(self.batch.registry_ttl_secs));
        }
        if !(320..=8192).contains(&self.engine.max_image_dim) {
            return Err(ConfigError::InvalidMaxImageDim(self.engine.max_image_dim));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn registry_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch.registry_ttl_secs)
    }

    pub fn queue_lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.worker.queue_lease_secs)
    }

    pub fn engine_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine.timeout_secs)
    }
}

// Note: No Default implementation because Config::new() can fail.
// Tests build the struct directly with the fields they care about.
