//! Process-wide player directory cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Utc};
use gridiron_adapters::{AdapterContext, FantasyDataSource, PlayerDirectory, SourceError};
use gridiron_core::PlayerInfo;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DIRECTORY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct CachedDirectory {
    fetched_at: Instant,
    season_year: i32,
    week: i32,
    players: Arc<PlayerDirectory>,
}

/// Holds the full directory (no capacity bound) and refetches it once it is
/// older than the TTL. Construct one per process and share it.
pub struct PlayerDirectoryCache {
    source: Arc<dyn FantasyDataSource>,
    ttl: Duration,
    state: RwLock<Option<CachedDirectory>>,
}

impl PlayerDirectoryCache {
    pub fn new(source: Arc<dyn FantasyDataSource>) -> Self {
        Self::with_ttl(source, DIRECTORY_TTL)
    }

    pub fn with_ttl(source: Arc<dyn FantasyDataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Fetch a fresh directory and replace the cached one. The fetch is
    /// tagged with the week of the previous fetch, or the source's current
    /// week when nothing has been fetched yet.
    pub async fn refresh(&self) -> Result<Arc<PlayerDirectory>, SourceError> {
        let ctx = self.current_context().await;
        self.refresh_with(&ctx).await
    }

    async fn current_context(&self) -> AdapterContext {
        if let Some(cached) = self.state.read().await.as_ref() {
            return AdapterContext::new(cached.season_year, cached.week);
        }
        match self.source.nfl_state().await {
            Ok(state) => AdapterContext::new(state.season_year().unwrap_or_else(|| Utc::now().year()), state.week),
            Err(err) => {
                // Week 0 marks a fetch not tied to any week.
                warn!(error = %err, "season state unavailable; tagging directory fetch with week 0");
                AdapterContext::new(Utc::now().year(), 0)
            }
        }
    }

    /// As [`refresh`](Self::refresh), tagged with an import run's context.
    pub async fn refresh_with(&self, ctx: &AdapterContext) -> Result<Arc<PlayerDirectory>, SourceError> {
        let players = Arc::new(self.source.player_directory(ctx).await?);
        info!(players = players.len(), "player directory refreshed");
        *self.state.write().await = Some(CachedDirectory {
            fetched_at: Instant::now(),
            season_year: ctx.season_year,
            week: ctx.week,
            players: Arc::clone(&players),
        });
        Ok(players)
    }

    /// The cached directory, refreshed first when missing or stale.
    pub async fn directory(&self) -> Result<Arc<PlayerDirectory>, SourceError> {
        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.players));
                }
            }
        }
        self.refresh().await
    }

    pub async fn get(&self, player_id: &str) -> Result<Option<PlayerInfo>, SourceError> {
        Ok(self.directory().await?.get(player_id).cloned())
    }
}
