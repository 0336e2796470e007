// Main entry point for the batch OCR/translation service

use scriptorium::{
    core::types::BatchKind,
    orchestration::{reconcile, start_ocr_batch, start_translation_batch, ProcessingView},
    Config, Lang, MemoryQueue, MemoryRegistry, MemoryStore, Metrics, OcrEngineKind,
    OrchestrateError, ProviderFactory, StoreError, TranslationEngineKind, WorkerDeps, WorkerPool,
};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    registry: Arc<MemoryRegistry>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "scriptorium={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== SCRIPTORIUM BATCH PROCESSOR ===");
    info!(
        "Config: workers={} max_jobs={} rss_ceiling={}MB registry_ttl={}s",
        config.worker.count,
        config.worker.max_jobs,
        config.worker.max_rss_mb,
        config.batch.registry_ttl_secs,
    );

    let metrics = Metrics::new();
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(config.queue_lease()));
    let registry = Arc::new(MemoryRegistry::new());

    if let Ok(slug) = std::env::var("DEMO_PROJECT") {
        seed_demo_project(&store, &slug).await?;
        info!(project = slug, "seeded demo project with 10 pages");
    }

    // Start the worker pool; it outlives the server.
    let _pool = WorkerPool::spawn(WorkerDeps {
        queue: queue.clone(),
        store: store.clone(),
        registry: registry.clone(),
        factory: Arc::new(ProviderFactory::new(config.clone())),
        config: config.clone(),
        metrics: metrics.clone(),
    });

    let state = AppState {
        config: config.clone(),
        store,
        queue,
        registry,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/projects/:slug/ocr", post(start_ocr))
        .route("/projects/:slug/translate", post(start_translation))
        .route("/projects/:slug/status", get(project_status))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on http://{addr}");
    info!("Endpoints:");
    info!("  GET  /                        - Root endpoint");
    info!("  GET  /health                  - Health check");
    info!("  GET  /metrics                 - Prometheus metrics");
    info!("  GET  /stats                   - Detailed statistics");
    info!("  POST /projects/:slug/ocr      - Start an OCR batch");
    info!("  POST /projects/:slug/translate - Start a translation batch");
    info!("  GET  /projects/:slug/status   - Reconciled batch status");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Seed a demo project with blank page scans so the flow can be driven
/// end-to-end without a real document store.
async fn seed_demo_project(store: &MemoryStore, slug: &str) -> Result<()> {
    use image::{DynamicImage, Rgba, RgbaImage};

    let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255])));
    let png = scriptorium::utils::image_ops::encode_png_async(page).await?;

    store.add_project(slug);
    for i in 1..=10 {
        store.add_page(slug, &i.to_string(), Some(png.clone()));
    }
    Ok(())
}

async fn root() -> &'static str {
    "Scriptorium - Batch OCR/Translation Orchestrator"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {e}"),
        )
    })
}

#[derive(Debug, Deserialize)]
struct OcrRequest {
    engine: String,
    language: String,
    secondary_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    engine: String,
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    /// Absent when the project has no eligible pages.
    task_id: Option<String>,
    total_pages: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    tracking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<String>,
}

impl StatusResponse {
    fn untracked() -> Self {
        Self {
            tracking: false,
            state: None,
            completed: None,
            total: None,
            progress: None,
            task_id: None,
            engine: None,
        }
    }
}

fn bad_request(detail: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, detail)
}

fn orchestrate_error(e: OrchestrateError) -> (StatusCode, String) {
    match &e {
        OrchestrateError::Store(StoreError::ProjectNotFound(_)) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Start an OCR batch for a project
async fn start_ocr(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(req): Json<OcrRequest>,
) -> Result<Json<StartResponse>, (StatusCode, String)> {
    let engine: OcrEngineKind = req.engine.parse().map_err(bad_request)?;
    let language: Lang = req.language.parse().map_err(bad_request)?;
    let secondary: Option<Lang> = match &req.secondary_language {
        Some(code) => Some(code.parse().map_err(bad_request)?),
        None => None,
    };

    let started = start_ocr_batch(
        state.store.as_ref(),
        state.queue.as_ref(),
        state.registry.as_ref(),
        &state.config,
        &state.metrics,
        &slug,
        engine,
        language,
        secondary,
    )
    .await
    .map_err(orchestrate_error)?;

    Ok(Json(match started {
        Some(s) => StartResponse {
            task_id: Some(s.task_id.to_string()),
            total_pages: s.total,
        },
        None => StartResponse {
            task_id: None,
            total_pages: 0,
        },
    }))
}

/// Start a translation batch for a project
async fn start_translation(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<StartResponse>, (StatusCode, String)> {
    let engine: TranslationEngineKind = req.engine.parse().map_err(bad_request)?;
    let source: Lang = req.source_lang.parse().map_err(bad_request)?;
    let target: Lang = req.target_lang.parse().map_err(bad_request)?;

    let started = start_translation_batch(
        state.store.as_ref(),
        state.queue.as_ref(),
        state.registry.as_ref(),
        &state.config,
        &state.metrics,
        &slug,
        engine,
        source,
        target,
    )
    .await
    .map_err(orchestrate_error)?;

    Ok(Json(match started {
        Some(s) => StartResponse {
            task_id: Some(s.task_id.to_string()),
            total_pages: s.total,
        },
        None => StartResponse {
            task_id: None,
            total_pages: 0,
        },
    }))
}

/// Reconciled processing status for a project.
///
/// Never fails: registry or queue trouble degrades to the untracked view.
async fn project_status(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Json<StatusResponse> {
    for kind in [BatchKind::Ocr, BatchKind::Translation] {
        let view = reconcile(
            state.registry.as_ref(),
            state.queue.as_ref(),
            &state.metrics,
            &slug,
            kind,
        )
        .await;

        if let ProcessingView::Tracking { entry, status } = view {
            return Json(StatusResponse {
                tracking: true,
                state: Some(status.state.as_str()),
                completed: Some(status.completed),
                total: Some(status.total),
                progress: Some(status.progress),
                task_id: Some(entry.task_id),
                engine: Some(entry.engine),
            });
        }
    }

    Json(StatusResponse::untracked())
}
