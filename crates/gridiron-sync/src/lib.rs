//! Import orchestration: staging ingestion, promotion into production
//! tables, and the weekly schedule that drives both.

pub mod config;
pub mod ingest;
pub mod player_cache;
pub mod promotion;
pub mod staging;
pub mod store;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gridiron_adapters::{FantasyDataSource, SleeperSource};
use gridiron_storage::{HttpClientConfig, HttpFetcher, PayloadArchive};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::{LeagueFile, SyncConfig};
pub use ingest::{stage_week, StageRequest, StagedCounts};
pub use player_cache::PlayerDirectoryCache;
pub use promotion::{promote_week, PromotionCounts};
pub use store::{connect_pool, run_migrations, PgStore, PromotionStore, StagingStore, WarehouseStore};

pub const MAX_WEEK: i32 = 18;

/// Body of an import trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub season_year: i32,
    pub week: i32,
    #[serde(default)]
    pub league_id: Option<String>,
    #[serde(default)]
    pub include_draft: bool,
}

impl ImportRequest {
    pub fn new(season_year: i32, week: i32) -> Self {
        Self {
            season_year,
            week,
            league_id: None,
            include_draft: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("week must be between 1 and {MAX_WEEK}, got {0}")]
    Week(i32),
    #[error("season year {0} is out of range")]
    Season(i32),
    #[error("no league id given and GRIDIRON_LEAGUE_ID is not set")]
    MissingLeague,
}

pub fn validate_week(season_year: i32, week: i32) -> Result<(), RequestError> {
    if !(1..=MAX_WEEK).contains(&week) {
        return Err(RequestError::Week(week));
    }
    if !(2000..=2100).contains(&season_year) {
        return Err(RequestError::Season(season_year));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub league_id: String,
    pub season_year: i32,
    pub week: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub staged: StagedCounts,
    pub promoted: PromotionCounts,
}

pub struct ImportPipeline {
    config: SyncConfig,
    source: Arc<dyn FantasyDataSource>,
    store: Arc<dyn WarehouseStore>,
    directory: Arc<PlayerDirectoryCache>,
}

impl ImportPipeline {
    pub fn new(config: SyncConfig, source: Arc<dyn FantasyDataSource>, store: Arc<dyn WarehouseStore>) -> Self {
        let directory = Arc::new(PlayerDirectoryCache::new(Arc::clone(&source)));
        Self {
            config,
            source,
            store,
            directory,
        }
    }

    /// HTTP source (archiving payloads when `ARTIFACTS_DIR` is set) over a
    /// Postgres store.
    pub fn postgres(config: SyncConfig, pool: PgPool) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let mut source = SleeperSource::new(config.api_base_url.clone(), http);
        if let Some(dir) = &config.artifacts_dir {
            source = source.with_archive(PayloadArchive::new(dir.clone()));
        }
        Ok(Self::new(config, Arc::new(source), Arc::new(PgStore::new(pool))))
    }

    pub fn with_directory_cache(mut self, directory: Arc<PlayerDirectoryCache>) -> Self {
        self.directory = directory;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn directory(&self) -> Arc<PlayerDirectoryCache> {
        Arc::clone(&self.directory)
    }

    fn resolve_league(&self, league_id: Option<&str>) -> Result<String, RequestError> {
        league_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.league_id.clone())
            .ok_or(RequestError::MissingLeague)
    }

    /// Stage one league-week, then promote it.
    pub async fn run(&self, request: ImportRequest) -> Result<ImportSummary> {
        validate_week(request.season_year, request.week)?;
        let league_id = self.resolve_league(request.league_id.as_deref())?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("import", %run_id, %league_id, season_year = request.season_year, week = request.week);

        async move {
            let stage_request = StageRequest {
                league_id: league_id.clone(),
                season_year: request.season_year,
                week: request.week,
                scoring_mode: self.config.scoring_mode,
                include_draft: request.include_draft,
                playoff_week_start_override: self.config.playoff_week_start,
            };
            let staged = stage_week(self.source.as_ref(), &self.directory, self.store.as_ref(), &stage_request)
                .await
                .context("staging ingestion")?;
            let promoted = promote_week(self.store.as_ref(), &league_id, request.season_year, request.week)
                .await
                .context("promotion")?;

            let summary = ImportSummary {
                run_id,
                league_id,
                season_year: request.season_year,
                week: request.week,
                started_at,
                finished_at: Utc::now(),
                staged,
                promoted,
            };
            self.store.record_import_run(&summary).await?;
            info!(processed = summary.promoted.processed(), "import finished");
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Promotion only, for rows already staged. Falls back to the
    /// configured league when none is given.
    pub async fn promote(&self, league_id: Option<&str>, season_year: i32, week: i32) -> Result<PromotionCounts> {
        validate_week(season_year, week)?;
        let league_id = self.resolve_league(league_id)?;
        promote_week(self.store.as_ref(), &league_id, season_year, week).await
    }

    /// Import the most recently completed week according to the source's
    /// season state. `None` before week 1 has finished.
    pub async fn run_latest_completed_week(&self) -> Result<Option<ImportSummary>> {
        let state = self.source.nfl_state().await.context("fetching season state")?;
        let (Some(season_year), Some(week)) = (state.season_year(), state.last_completed_week()) else {
            info!(season = %state.season, week = state.week, "no completed week to import yet");
            return Ok(None);
        };
        self.run(ImportRequest::new(season_year, week)).await.map(Some)
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.import_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_latest_completed_week().await {
                    Ok(Some(summary)) => info!(
                        run_id = %summary.run_id,
                        season_year = summary.season_year,
                        week = summary.week,
                        "scheduled import finished"
                    ),
                    Ok(None) => {}
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled import failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

pub async fn run_import_once_from_env(request: ImportRequest) -> Result<ImportSummary> {
    let config = SyncConfig::load()?;
    let pool = connect_pool(&config.database_url).await?;
    ImportPipeline::postgres(config, pool)?.run(request).await
}
