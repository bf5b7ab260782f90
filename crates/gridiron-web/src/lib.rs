//! JSON API over the import pipeline and recap service.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gridiron_adapters::SourceError;
use gridiron_core::WeekKey;
use gridiron_recap::{RecapConfig, RecapError, RecapService, VideoOptions};
use gridiron_sync::{connect_pool, validate_week, ImportPipeline, ImportRequest, RequestError, SyncConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared handler state. Both services are absent when no database is
/// reachable; endpoints that need them answer 503.
#[derive(Clone, Default)]
pub struct AppState {
    pub pipeline: Option<Arc<ImportPipeline>>,
    pub recaps: Option<Arc<RecapService>>,
}

impl AppState {
    pub fn new(pipeline: Option<Arc<ImportPipeline>>, recaps: Option<Arc<RecapService>>) -> Self {
        Self { pipeline, recaps }
    }

    fn pipeline(&self) -> Result<&ImportPipeline, ApiError> {
        self.pipeline.as_deref().ok_or(ApiError::Unavailable)
    }

    fn recaps(&self) -> Result<&RecapService, ApiError> {
        self.recaps.as_deref().ok_or(ApiError::Unavailable)
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Unavailable,
    NotConfigured(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable | ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Upstream(msg) | ApiError::NotConfigured(msg) => {
                msg.clone()
            }
            ApiError::Unavailable => "database is not configured".to_string(),
            ApiError::Internal(err) => format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Classify by the first typed error in the chain: bad input is 400,
/// upstream source failures 502, everything else 500.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(request) = err.chain().find_map(|e| e.downcast_ref::<RequestError>()) {
            return ApiError::BadRequest(request.to_string());
        }
        if err
            .chain()
            .filter_map(|e| e.downcast_ref::<SourceError>())
            .any(SourceError::is_upstream)
        {
            return ApiError::Upstream(format!("{err:#}"));
        }
        ApiError::Internal(err)
    }
}

impl From<RecapError> for ApiError {
    fn from(err: RecapError) -> Self {
        match err {
            RecapError::NotConfigured(_) => ApiError::NotConfigured(err.to_string()),
            RecapError::MissingRecap(_) => ApiError::NotFound(err.to_string()),
            RecapError::TextGen(_) | RecapError::Video(_) => ApiError::Upstream(err.to_string()),
            RecapError::Other(inner) => inner.into(),
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        if err.is_upstream() {
            ApiError::Upstream(err.to_string())
        } else {
            ApiError::Internal(err.into())
        }
    }
}

type ApiResult = Result<Json<JsonValue>, ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult {
    Ok(Json(json!({"success": true, "data": data})))
}

fn week_key(season_year: i32, week: i32) -> Result<WeekKey, ApiError> {
    validate_week(season_year, week)?;
    Ok(WeekKey::new(season_year, week))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/admin/import", post(import_handler))
        .route("/api/admin/promote", post(promote_handler))
        .route("/api/standings/{season}/{week}", get(standings_handler))
        .route("/api/snapshots/{season}/{week}", get(snapshot_handler))
        .route("/api/recaps/{season}/{week}", post(recap_handler))
        .route("/api/recaps/{season}/{week}/video", post(video_handler))
        .route("/api/video/avatars", get(avatars_handler))
        .route("/api/video/voices", get(voices_handler))
        .route("/api/players/{id}", get(player_handler))
        .with_state(Arc::new(state))
}

/// Connect to the configured database if possible and build both services
/// over it. A missing database is logged, not fatal.
pub async fn state_from_env() -> anyhow::Result<AppState> {
    let config = SyncConfig::load()?;
    let pool = match connect_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "database unavailable; data endpoints will answer 503");
            return Ok(AppState::default());
        }
    };
    let recaps = RecapService::postgres(pool.clone(), &RecapConfig::from_env())?;
    let pipeline = ImportPipeline::postgres(config, pool)?;
    Ok(AppState::new(Some(Arc::new(pipeline)), Some(Arc::new(recaps))))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("GRIDIRON_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let state = state_from_env().await?;
    serve(state, port).await
}

/// Serve until ctrl-c; background video polls are cancelled on the way out.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let video_shutdown = state.recaps.as_ref().and_then(|r| r.shutdown_token());
    let scheduler = match &state.pipeline {
        Some(pipeline) => pipeline.maybe_build_scheduler().await?,
        None => None,
    };
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!("import scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to listen for ctrl-c");
            }
        })
        .await?;

    if let Some(token) = video_shutdown {
        token.cancel();
    }
    if let Some(mut sched) = scheduler {
        sched.shutdown().await?;
    }
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "database": state.pipeline.is_some(),
    }))
}

async fn import_handler(State(state): State<Arc<AppState>>, Json(request): Json<ImportRequest>) -> ApiResult {
    validate_week(request.season_year, request.week)?;
    let summary = state.pipeline()?.run(request).await?;
    let processed = summary.promoted.processed();
    ok(json!({"run": summary, "processed": processed}))
}

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    season_year: i32,
    week: i32,
    #[serde(default)]
    league_id: Option<String>,
}

async fn promote_handler(State(state): State<Arc<AppState>>, Json(request): Json<PromoteRequest>) -> ApiResult {
    validate_week(request.season_year, request.week)?;
    let counts = state
        .pipeline()?
        .promote(request.league_id.as_deref(), request.season_year, request.week).await?;
    ok(json!({"promoted": counts, "processed": counts.processed()}))
}

async fn standings_handler(State(state): State<Arc<AppState>>, Path((season, week)): Path<(i32, i32)>) -> ApiResult {
    let target = week_key(season, week)?;
    let snapshot = state.recaps()?.snapshot(target).await?;
    ok(snapshot.standings)
}

async fn snapshot_handler(State(state): State<Arc<AppState>>, Path((season, week)): Path<(i32, i32)>) -> ApiResult {
    let target = week_key(season, week)?;
    ok(state.recaps()?.snapshot(target).await?)
}

async fn recap_handler(State(state): State<Arc<AppState>>, Path((season, week)): Path<(i32, i32)>) -> ApiResult {
    let target = week_key(season, week)?;
    ok(state.recaps()?.generate_recap(target).await?)
}

async fn video_handler(
    State(state): State<Arc<AppState>>,
    Path((season, week)): Path<(i32, i32)>,
    Json(options): Json<VideoOptions>,
) -> Result<Response, ApiError> {
    let target = week_key(season, week)?;
    let started = state.recaps()?.start_video(target, options).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"success": true, "data": started}))).into_response())
}

async fn avatars_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.recaps()?.avatars().await?)
}

async fn voices_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.recaps()?.voices().await?)
}

async fn player_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let directory = state.pipeline()?.directory();
    match directory.get(&id).await? {
        Some(player) => ok(player),
        None => Err(ApiError::NotFound(format!("player {id} not found"))),
    }
}
