// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! JSON API driving one scan session

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, CatalogStats};
use crate::config::AppConfig;
use crate::history::{ScanHistory, ScanHistoryRecord};
use crate::options::{ScanOptions, ScanProfile};
use crate::profiles::{Preferences, ProfileStore, Theme};
use crate::scan::{OrganizeTarget, ScanOrchestrator, ScanProgress, ScanReport, ScanState};
use crate::session::ScanSession;
use crate::store::{JsonFileStore, KeyValueStore};
use crate::tree::FileTree;
use crate::CuratorError;

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub session: Arc<ScanSession>,
    pub profiles: ProfileStore,
    pub preferences: Preferences,
    pub history: Arc<ScanHistory>,
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ScanOrchestrator>,
        store: Arc<dyn KeyValueStore>,
        history: Arc<ScanHistory>,
        catalog: Catalog,
        defaults: ScanOptions,
    ) -> Self {
        Self {
            orchestrator,
            session: Arc::new(ScanSession::new(FileTree::default(), defaults)),
            profiles: ProfileStore::new(store.clone()),
            preferences: Preferences::new(store),
            history,
            catalog,
        }
    }

    /// Production state: JSON store, SQLite catalog, Ollama-backed pipeline
    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.storage.store_path)?);
        let history = Arc::new(ScanHistory::new(store.clone()));
        let catalog = Catalog::open(&config.storage.catalog_path)?;
        let orchestrator = ScanOrchestrator::from_config(config, history.clone(), Some(catalog.clone()))?;
        Ok(Self::new(
            Arc::new(orchestrator),
            store,
            history,
            catalog,
            config.scan.defaults.clone(),
        ))
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/scans", post(api_start_scan))
        .route("/api/scans/current", get(api_current_scan))
        .route("/api/scans/current/cancel", post(api_cancel_scan))
        .route("/api/results", get(api_results))
        .route("/api/options", get(api_get_options).put(api_put_options))
        .route("/api/profiles", get(api_list_profiles).post(api_save_profile))
        .route("/api/profiles/:id", delete(api_delete_profile))
        .route("/api/profiles/:id/load", post(api_load_profile))
        .route("/api/history", get(api_history))
        .route("/api/catalog/stats", get(api_catalog_stats))
        .route("/api/preferences/theme", get(api_get_theme).put(api_put_theme))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(CuratorError);

impl From<CuratorError> for ApiError {
    fn from(e: CuratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CuratorError::NoSelection | CuratorError::Config(_) => StatusCode::BAD_REQUEST,
            CuratorError::ScanInProgress | CuratorError::InvalidState(_) => StatusCode::CONFLICT,
            CuratorError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// === Scans ===

#[derive(Debug, Deserialize)]
struct StartScanRequest {
    folders: Vec<PathBuf>,
    /// Replaces the session options for this and later scans
    #[serde(default)]
    options: Option<ScanOptions>,
    #[serde(default)]
    profile_id: Option<String>,
    /// Falls back to the configured auto-organize target
    #[serde(default)]
    organize: Option<OrganizeTarget>,
}

#[derive(Debug, Serialize)]
struct ScanStatusResponse {
    state: ScanState,
    progress: ScanProgress,
    fraction: f64,
    report: Option<ScanReport>,
}

async fn api_start_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<(StatusCode, Json<ScanStatusResponse>)> {
    if let Some(target) = &request.organize {
        if !target.base_folder.is_absolute() {
            return Err(CuratorError::Config("organize.base_folder must be absolute".to_string()).into());
        }
    }

    if let Some(id) = &request.profile_id {
        if state.profiles.get(id)?.is_none() {
            return Err(CuratorError::NodeNotFound(format!("profile {}", id)).into());
        }
    }

    // Claim the run before answering so a concurrent request sees 409
    let ticket = state.orchestrator.begin_scan(&request.folders)?;

    if let Some(id) = &request.profile_id {
        state.session.load_profile(&state.profiles, id)?;
    } else if let Some(options) = request.options {
        state.session.set_options(options);
    }

    let options = state.session.options();
    let target = request.organize.or_else(|| state.orchestrator.auto_organize().cloned());
    let task_state = state.clone();

    tokio::spawn(async move {
        match task_state.orchestrator.run_scan(ticket, &options, target).await {
            Ok(report) => {
                if let Err(e) = task_state.session.apply_report(&report) {
                    warn!("Could not apply scan results to the session: {}", e);
                }
            }
            Err(e) => warn!("Scan did not complete: {}", e),
        }
    });

    info!("Scan requested");
    Ok((StatusCode::ACCEPTED, Json(scan_status(&state))))
}

fn scan_status(state: &AppState) -> ScanStatusResponse {
    let progress = state.orchestrator.progress();
    ScanStatusResponse {
        state: state.orchestrator.state(),
        progress,
        fraction: progress.fraction(),
        report: state.orchestrator.last_report(),
    }
}

async fn api_current_scan(State(state): State<Arc<AppState>>) -> Json<ScanStatusResponse> {
    Json(scan_status(&state))
}

async fn api_cancel_scan(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.orchestrator.cancel_scan()?;
    Ok(StatusCode::ACCEPTED)
}

async fn api_results(State(state): State<Arc<AppState>>) -> Json<Vec<crate::classifier::ClassificationResult>> {
    Json(state.session.results())
}

// === Options & profiles ===

async fn api_get_options(State(state): State<Arc<AppState>>) -> Json<ScanOptions> {
    Json(state.session.options())
}

async fn api_put_options(
    State(state): State<Arc<AppState>>,
    Json(options): Json<ScanOptions>,
) -> Json<ScanOptions> {
    state.session.set_options(options.clone());
    Json(options)
}

async fn api_list_profiles(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ScanProfile>>> {
    Ok(Json(state.profiles.list()?))
}

#[derive(Debug, Deserialize)]
struct SaveProfileRequest {
    name: String,
    /// Defaults to the current session options
    #[serde(default)]
    options: Option<ScanOptions>,
}

async fn api_save_profile(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveProfileRequest>,
) -> ApiResult<(StatusCode, Json<ScanProfile>)> {
    if request.name.trim().is_empty() {
        return Err(CuratorError::Config("profile name is empty".to_string()).into());
    }
    let options = request.options.unwrap_or_else(|| state.session.options());
    let profile = state.profiles.save_profile(request.name.trim(), &options)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn api_delete_profile(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.profiles.delete_profile(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

async fn api_load_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScanOptions>> {
    if state.profiles.get(&id)?.is_none() {
        return Err(CuratorError::NodeNotFound(format!("profile {}", id)).into());
    }
    Ok(Json(state.session.load_profile(&state.profiles, &id)?))
}

// === History, catalog, preferences ===

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn api_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ScanHistoryRecord>>> {
    Ok(Json(state.history.get_recent(query.limit.unwrap_or(20))?))
}

async fn api_catalog_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<CatalogStats>> {
    Ok(Json(state.catalog.stats()?))
}

#[derive(Debug, Serialize, Deserialize)]
struct ThemeBody {
    theme: Theme,
}

async fn api_get_theme(State(state): State<Arc<AppState>>) -> ApiResult<Json<ThemeBody>> {
    Ok(Json(ThemeBody { theme: state.preferences.theme()? }))
}

async fn api_put_theme(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ThemeBody>,
) -> ApiResult<Json<ThemeBody>> {
    state.preferences.set_theme(body.theme)?;
    Ok(Json(body))
}

/// Start the API server
pub async fn start_server(config: AppConfig) -> crate::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);

    let addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| CuratorError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
