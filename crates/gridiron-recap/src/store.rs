//! Postgres reads for snapshots plus recap and video persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use gridiron_core::{LineupSlot, Position, RecapRecord, WeekKey};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::warn;

use crate::snapshot::{GameRow, RosterScoreRow, SnapshotSource};
use crate::video::{VideoOutcome, VideoStatus, VideoStatusSink};

#[async_trait]
pub trait RecapStore: Send + Sync {
    /// Insert or replace the recap for its week.
    async fn save_recap(&self, recap: &RecapRecord, model: &str) -> Result<()>;
    async fn recap_for(&self, target: WeekKey) -> Result<Option<RecapRecord>>;
    async fn register_video(&self, target: WeekKey, video_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgRecapStore {
    pool: PgPool,
}

impl PgRecapStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn recap_from_row(row: &PgRow) -> Result<RecapRecord> {
    Ok(RecapRecord {
        season_year: row.try_get("season_year")?,
        week: row.try_get("week")?,
        recap_text: row.try_get("recap_text")?,
        generated_at: row.try_get("generated_at")?,
    })
}

fn roster_score_from_row(row: &PgRow) -> Result<Option<RosterScoreRow>> {
    let position: String = row.try_get("nfl_position")?;
    let slot: String = row.try_get("lineup_slot")?;
    let (Some(nfl_position), Some(lineup_slot)) = (Position::parse(&position), LineupSlot::from_template_label(&slot))
    else {
        warn!(%position, %slot, "skipping roster row with unknown position or slot");
        return Ok(None);
    };
    Ok(Some(RosterScoreRow {
        season_year: row.try_get("season_year")?,
        week: row.try_get("week")?,
        manager_id: row.try_get("manager_id")?,
        manager_name: row.try_get("manager_name")?,
        player_id: row.try_get("player_id")?,
        player_name: row.try_get("player_name")?,
        nfl_position,
        lineup_slot,
        is_starter: row.try_get("is_starter")?,
        points: row.try_get("points")?,
    }))
}

#[async_trait]
impl SnapshotSource for PgRecapStore {
    async fn games_through(&self, target: WeekKey) -> Result<Vec<GameRow>> {
        let rows = sqlx::query(
            r#"
            SELECT m.season_year, m.week,
                   t1.manager_id AS manager1_id, m1.name AS manager1_name,
                   t2.manager_id AS manager2_id, m2.name AS manager2_name,
                   m.team1_score, m.team2_score, m.is_playoff
              FROM matchups m
              JOIN teams t1 ON t1.id = m.team1_id
              JOIN teams t2 ON t2.id = m.team2_id
              JOIN managers m1 ON m1.id = t1.manager_id
              JOIN managers m2 ON m2.id = t2.manager_id
             WHERE (m.season_year, m.week) <= ($1, $2)
             ORDER BY m.season_year, m.week, m.id
            "#,
        )
        .bind(target.season_year)
        .bind(target.week)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading games through {target}"))?;

        rows.iter()
            .map(|row| {
                Ok(GameRow {
                    season_year: row.try_get("season_year")?,
                    week: row.try_get("week")?,
                    manager1_id: row.try_get("manager1_id")?,
                    manager1_name: row.try_get("manager1_name")?,
                    manager2_id: row.try_get("manager2_id")?,
                    manager2_name: row.try_get("manager2_name")?,
                    score1: row.try_get("team1_score")?,
                    score2: row.try_get("team2_score")?,
                    is_playoff: row.try_get("is_playoff")?,
                })
            })
            .collect()
    }

    async fn roster_scores(&self, target: WeekKey) -> Result<Vec<RosterScoreRow>> {
        let rows = sqlx::query(
            r#"
            SELECT r.season_year, r.week, r.manager_id, mg.name AS manager_name,
                   r.player_id, r.player_name, r.nfl_position, r.lineup_slot, r.is_starter,
                   COALESCE(ps.fantasy_points, 0)::DOUBLE PRECISION AS points
              FROM (
                    SELECT season_year, week, manager_id, player_id, player_name,
                           nfl_position, lineup_slot, is_starter
                      FROM weekly_roster
                     WHERE season_year = $1 AND week = $2
                    UNION ALL
                    SELECT season_year, week, manager_id, player_id, player_name,
                           nfl_position, lineup_slot, is_starter
                      FROM playoff_roster
                     WHERE season_year = $1 AND week = $2
                   ) r
              JOIN managers mg ON mg.id = r.manager_id
              LEFT JOIN player_stats ps
                ON ps.season_year = r.season_year AND ps.week = r.week AND ps.player_id = r.player_id
             ORDER BY r.manager_id, r.is_starter DESC, points DESC
            "#,
        )
        .bind(target.season_year)
        .bind(target.week)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading roster scores for {target}"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(score) = roster_score_from_row(row)? {
                out.push(score);
            }
        }
        Ok(out)
    }

    async fn recaps_before(&self, target: WeekKey, limit: usize) -> Result<Vec<RecapRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT season_year, week, recap_text, generated_at
              FROM weekly_recaps
             WHERE (season_year, week) < ($1, $2)
             ORDER BY season_year DESC, week DESC
             LIMIT $3
            "#,
        )
        .bind(target.season_year)
        .bind(target.week)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading recaps before {target}"))?;
        rows.iter().map(recap_from_row).collect()
    }
}

#[async_trait]
impl RecapStore for PgRecapStore {
    async fn save_recap(&self, recap: &RecapRecord, model: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weekly_recaps (season_year, week, recap_text, model, generated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (season_year, week) DO UPDATE
               SET recap_text = EXCLUDED.recap_text,
                   model = EXCLUDED.model,
                   generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(recap.season_year)
        .bind(recap.week)
        .bind(&recap.recap_text)
        .bind(model)
        .bind(recap.generated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving recap for {}-{}", recap.season_year, recap.week))?;
        Ok(())
    }

    async fn recap_for(&self, target: WeekKey) -> Result<Option<RecapRecord>> {
        let row = sqlx::query(
            "SELECT season_year, week, recap_text, generated_at FROM weekly_recaps WHERE season_year = $1 AND week = $2",
        )
        .bind(target.season_year)
        .bind(target.week)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading recap for {target}"))?;
        row.as_ref().map(recap_from_row).transpose()
    }

    async fn register_video(&self, target: WeekKey, video_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recap_videos (season_year, week, provider_video_id, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (provider_video_id) DO NOTHING
            "#,
        )
        .bind(target.season_year)
        .bind(target.week)
        .bind(video_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("registering video {video_id}"))?;
        Ok(())
    }
}

#[async_trait]
impl VideoStatusSink for PgRecapStore {
    async fn record_attempt(&self, video_id: &str, attempt: u32, status: &VideoStatus) -> Result<()> {
        // Terminal statuses are written by record_outcome.
        let label = match status {
            VideoStatus::Completed { .. } | VideoStatus::Failed { .. } => "processing",
            other => other.label(),
        };
        sqlx::query(
            "UPDATE recap_videos SET status = $2, poll_attempts = $3, updated_at = NOW() WHERE provider_video_id = $1",
        )
        .bind(video_id)
        .bind(label)
        .bind(attempt as i32)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating video {video_id}"))?;
        Ok(())
    }

    async fn record_outcome(&self, video_id: &str, outcome: &VideoOutcome) -> Result<()> {
        let (url, error) = match outcome {
            VideoOutcome::Completed { video_url, .. } => (video_url.clone(), None),
            VideoOutcome::Failed { error, .. } => (None, Some(error.clone())),
            VideoOutcome::TimedOut { attempts } => (None, Some(format!("no result after {attempts} polls"))),
            VideoOutcome::Cancelled { .. } => (None, Some("polling cancelled at shutdown".to_string())),
        };
        sqlx::query(
            r#"
            UPDATE recap_videos
               SET status = $2, video_url = $3, error = $4, poll_attempts = $5, updated_at = NOW()
             WHERE provider_video_id = $1
            "#,
        )
        .bind(video_id)
        .bind(outcome.status_label())
        .bind(url)
        .bind(error)
        .bind(outcome.attempts() as i32)
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording outcome for video {video_id}"))?;
        Ok(())
    }
}
