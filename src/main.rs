//! Dataset Reconciler - HTTP front door for the reconciliation pipeline.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use dataset_reconciler::acquirer::ProgressStatus;
use dataset_reconciler::client::{AnalysisApiClient, GatewayClient};
use dataset_reconciler::config::ServiceConfig;
use dataset_reconciler::error::{AcquireError, FetchError};
use dataset_reconciler::pipeline::ExploredDataset;
use dataset_reconciler::{CanonicalDatasetReport, CompiledTables, PollPolicy, Reconciler};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Latest progress callback value for a job.
#[derive(Debug, Clone, Copy, Serialize)]
struct JobProgress {
    status: ProgressStatus,
    progress: f64,
}

type ReportMap = RwLock<HashMap<String, CanonicalDatasetReport>>;
type ProgressMap = RwLock<HashMap<String, JobProgress>>;

/// Application state shared across handlers. Reports live for the process only.
#[derive(Clone)]
struct AppState {
    reports: Arc<ReportMap>,
    progress: Arc<ProgressMap>,
    reconciler: Arc<Reconciler>,
    analysis_api: Arc<AnalysisApiClient>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "dataset_reconciler=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let tables = Arc::new(CompiledTables::compile(config.tables()?));
    info!("Extraction tables ready ({} fields)", tables.tables().fields.len());

    let analysis_api = Arc::new(AnalysisApiClient::new(config.analysis_api_url.clone()));
    let gateway = Arc::new(GatewayClient::new(config.gateway_url.clone()));
    info!("Analysis API at {}, gateway at {}", config.analysis_api_url, config.gateway_url);

    let policy = PollPolicy {
        interval: config.poll_interval,
        max_attempts: config.max_attempts,
        fallback: config.on_exhausted,
    };
    let reconciler = Reconciler::new(tables, analysis_api.clone(), gateway, policy);

    let state = AppState {
        reports: Arc::new(RwLock::new(HashMap::new())),
        progress: Arc::new(RwLock::new(HashMap::new())),
        reconciler: Arc::new(reconciler),
        analysis_api,
    };

    // Axum 0.7 path parameters use the `:name` syntax
    let app = Router::new()
        .route("/health", get(health))
        .route("/reconcile", post(reconcile_payload))
        .route("/upload", post(upload_dataset))
        .route("/jobs/:id/report", get(job_report))
        .route("/jobs/:id/progress", get(job_progress))
        .route("/datasets/:cid/report", get(dataset_report))
        .route("/explore", post(explore))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Reconcile a raw payload posted as JSON.
async fn reconcile_payload(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Json<CanonicalDatasetReport> {
    Json(state.reconciler.reconcile(&payload))
}

#[derive(Serialize)]
struct UploadResponse {
    analysis_id: String,
}

/// Forward an uploaded dataset to the analysis backend.
async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut filename = String::new();
    let mut file_data = Vec::new();
    let mut is_public = false;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        match field.name() {
            Some("file") => {
                filename = field.file_name().unwrap_or("dataset").to_string();
                file_data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?.to_vec();
            }
            Some("is_public") => {
                let value = field.text().await.unwrap_or_default();
                is_public = matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes, public: {})", filename, file_data.len(), is_public);

    let analysis_id = state
        .analysis_api
        .upload(&filename, file_data, is_public)
        .await
        .map_err(fetch_error_response)?;

    Ok(Json(UploadResponse { analysis_id }))
}

/// Acquire (or return the cached) report for an analysis job.
async fn job_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CanonicalDatasetReport>, (StatusCode, String)> {
    let cached = state.reports.read().unwrap().get(&id).cloned();
    if let Some(report) = cached {
        return Ok(Json(report));
    }

    let progress_map = state.progress.clone();
    let job_id = id.clone();
    let on_progress = move |status: ProgressStatus, progress: f64| {
        record_progress(&progress_map, &job_id, status, progress);
    };

    let result = state.reconciler.report_for_job(&id, on_progress).await;
    state.progress.write().unwrap().remove(&id);

    let report = result.map_err(|e| match e {
        AcquireError::Request(inner) => fetch_error_response(inner),
        AcquireError::Exhausted { .. } => {
            error!("{}", e);
            (StatusCode::GATEWAY_TIMEOUT, e.to_string())
        }
    })?;

    cache_job_report(&state.reports, &id, &report);
    Ok(Json(report))
}

/// Latest progress for a job that is being acquired, or completed once its report is cached.
async fn job_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobProgress>, StatusCode> {
    lookup_progress(&state.progress, &state.reports, &id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Reconcile a dataset stored on the gateway.
async fn dataset_report(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<CanonicalDatasetReport>, (StatusCode, String)> {
    let key = format!("cid:{}", cid);
    let cached = state.reports.read().unwrap().get(&key).cloned();
    if let Some(report) = cached {
        return Ok(Json(report));
    }

    let report = state
        .reconciler
        .report_for_content(&cid)
        .await
        .map_err(fetch_error_response)?;

    state.reports.write().unwrap().insert(key, report.clone());
    Ok(Json(report))
}

/// Reconcile several stored datasets in order.
async fn explore(
    State(state): State<AppState>,
    Json(cids): Json<Vec<String>>,
) -> Json<Vec<ExploredDataset>> {
    Json(state.reconciler.explore(&cids).await)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Keep a job report for later requests. Synthetic fallbacks are not kept, so the
/// next request polls the backend again. Returns whether the report was stored.
fn cache_job_report(reports: &ReportMap, id: &str, report: &CanonicalDatasetReport) -> bool {
    if report.is_synthetic() {
        info!("Not caching synthetic report for job {}", id);
        return false;
    }
    reports.write().unwrap().insert(id.to_string(), report.clone());
    true
}

/// Track a polling job. Completed jobs leave the map.
fn record_progress(progress: &ProgressMap, id: &str, status: ProgressStatus, value: f64) {
    let mut progress = progress.write().unwrap();
    match status {
        ProgressStatus::Processing => {
            progress.insert(id.to_string(), JobProgress { status, progress: value });
        }
        ProgressStatus::Completed => {
            progress.remove(id);
        }
    }
}

fn lookup_progress(progress: &ProgressMap, reports: &ReportMap, id: &str) -> Option<JobProgress> {
    if let Some(live) = progress.read().unwrap().get(id).copied() {
        return Some(live);
    }
    reports.read().unwrap().contains_key(id).then_some(JobProgress {
        status: ProgressStatus::Completed,
        progress: 100.0,
    })
}

fn fetch_error_response(e: FetchError) -> (StatusCode, String) {
    let status = match &e {
        FetchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        FetchError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    error!("Upstream request failed: {}", e);
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_reconciler::config::default_tables;
    use dataset_reconciler::reconcile;
    use serde_json::json;

    fn reconciled_report() -> CanonicalDatasetReport {
        let tables = CompiledTables::compile(default_tables());
        reconcile(&tables, &json!({"results": {"metadata": {"rows": 40}}}))
    }

    #[test]
    fn test_synthetic_job_report_is_not_cached() {
        let reports = ReportMap::default();

        let synthetic = CanonicalDatasetReport::synthetic_fallback();
        assert!(!cache_job_report(&reports, "17", &synthetic));
        assert!(reports.read().unwrap().get("17").is_none());

        let real = reconciled_report();
        assert!(cache_job_report(&reports, "17", &real));
        assert_eq!(reports.read().unwrap().get("17"), Some(&real));
    }

    #[test]
    fn test_completed_job_leaves_progress_map() {
        let progress = ProgressMap::default();
        let reports = ReportMap::default();

        record_progress(&progress, "9", ProgressStatus::Processing, 25.0);
        let live = lookup_progress(&progress, &reports, "9").unwrap();
        assert_eq!(live.status, ProgressStatus::Processing);
        assert_eq!(live.progress, 25.0);

        record_progress(&progress, "9", ProgressStatus::Completed, 100.0);
        assert!(progress.read().unwrap().is_empty());
        assert!(lookup_progress(&progress, &reports, "9").is_none());

        cache_job_report(&reports, "9", &reconciled_report());
        let done = lookup_progress(&progress, &reports, "9").unwrap();
        assert_eq!(done.status, ProgressStatus::Completed);
        assert_eq!(done.progress, 100.0);
    }
}
