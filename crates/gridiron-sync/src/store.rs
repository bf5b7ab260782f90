//! Persistence seams for ingestion and promotion, plus the Postgres store.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gridiron_core::{DraftPickRecord, MatchupRecord, PlayerStatRecord, RosterEntry, RosterTable, TeamRef};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use crate::staging::{
    StagingDraftPickRow, StagingMatchupRow, StagingPlayerStatRow, StagingRosterRow, StoredStagingDraftPick,
    StoredStagingMatchup, StoredStagingPlayerStat, StoredStagingRoster,
};
use crate::ImportSummary;

/// Writes made by ingestion. Every upsert resets `processed` to false.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn upsert_staging_roster(&self, row: &StagingRosterRow) -> Result<()>;
    async fn upsert_staging_player_stat(&self, row: &StagingPlayerStatRow) -> Result<()>;
    async fn upsert_staging_matchup(&self, row: &StagingMatchupRow) -> Result<()>;
    async fn upsert_staging_draft_pick(&self, row: &StagingDraftPickRow) -> Result<()>;
    async fn record_import_run(&self, summary: &ImportSummary) -> Result<()>;
}

/// Reads of unprocessed staging rows and the production upserts they feed.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Season-scoped external roster id to internal team/manager. Empty
    /// when the season is registered to a different league.
    async fn team_lookup(&self, league_id: &str, season_year: i32) -> Result<HashMap<i32, TeamRef>>;

    async fn unprocessed_rosters(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingRoster>>;
    async fn upsert_roster_entry(&self, table: RosterTable, entry: &RosterEntry) -> Result<()>;
    async fn mark_roster_processed(&self, staging_id: i64) -> Result<()>;

    async fn unprocessed_player_stats(&self, season_year: i32, week: i32) -> Result<Vec<StoredStagingPlayerStat>>;
    async fn upsert_player_stat(&self, stat: &PlayerStatRecord) -> Result<()>;
    /// Overwrite name and position on every roster row (either table) for
    /// this player-week. Returns the number of rows touched.
    async fn backfill_roster_identity(&self, stat: &PlayerStatRecord) -> Result<u64>;
    async fn mark_player_stat_processed(&self, staging_id: i64) -> Result<()>;

    async fn unprocessed_matchups(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingMatchup>>;
    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<()>;
    async fn mark_matchups_processed(&self, staging_ids: &[i64]) -> Result<()>;

    async fn unprocessed_draft_picks(&self, league_id: &str, season_year: i32) -> Result<Vec<StoredStagingDraftPick>>;
    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<()>;
    async fn mark_draft_pick_processed(&self, staging_id: i64) -> Result<()>;
}

/// Everything the import pipeline needs from one backing store.
pub trait WarehouseStore: StagingStore + PromotionStore {}

impl<T: StagingStore + PromotionStore> WarehouseStore for T {}

pub async fn connect_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("applying migrations")
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(connect_pool(database_url).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn mark_processed(&self, table: &str, staging_id: i64) -> Result<()> {
        sqlx::query(&format!("UPDATE {table} SET processed = TRUE WHERE id = $1"))
            .bind(staging_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {table} row {staging_id} processed"))?;
        Ok(())
    }
}

fn stored_roster(row: PgRow) -> Result<StoredStagingRoster> {
    Ok(StoredStagingRoster {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        roster_id: row.try_get("roster_id")?,
        season_year: row.try_get("season_year")?,
        week: row.try_get("week")?,
        starters: row.try_get("starters")?,
        players: row.try_get("players")?,
        player_lookup: row.try_get("player_lookup")?,
        roster_positions: row.try_get("roster_positions")?,
        playoff_week_start: row.try_get("playoff_week_start")?,
    })
}

#[async_trait]
impl StagingStore for PgStore {
    async fn upsert_staging_roster(&self, row: &StagingRosterRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staging_rosters (
                league_id, roster_id, season_year, week, owner_id, starters, players,
                player_lookup, roster_positions, playoff_week_start, raw_data, processed, imported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE, NOW())
            ON CONFLICT (league_id, roster_id, season_year, week) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                starters = EXCLUDED.starters,
                players = EXCLUDED.players,
                player_lookup = EXCLUDED.player_lookup,
                roster_positions = EXCLUDED.roster_positions,
                playoff_week_start = EXCLUDED.playoff_week_start,
                raw_data = EXCLUDED.raw_data,
                processed = FALSE,
                imported_at = NOW()
            "#,
        )
        .bind(&row.league_id)
        .bind(row.roster_id)
        .bind(row.season_year)
        .bind(row.week)
        .bind(&row.owner_id)
        .bind(Json(&row.starters))
        .bind(Json(&row.players))
        .bind(Json(&row.player_lookup))
        .bind(Json(&row.roster_positions))
        .bind(row.playoff_week_start)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting staging roster {} for {} week {}", row.roster_id, row.season_year, row.week))?;
        Ok(())
    }

    async fn upsert_staging_player_stat(&self, row: &StagingPlayerStatRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staging_player_stats (
                player_id, season_year, week, player_name, position, nfl_team,
                fantasy_points, stats, raw_data, processed, imported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, NOW())
            ON CONFLICT (player_id, season_year, week) DO UPDATE SET
                player_name = EXCLUDED.player_name,
                position = EXCLUDED.position,
                nfl_team = EXCLUDED.nfl_team,
                fantasy_points = EXCLUDED.fantasy_points,
                stats = EXCLUDED.stats,
                raw_data = EXCLUDED.raw_data,
                processed = FALSE,
                imported_at = NOW()
            "#,
        )
        .bind(&row.player_id)
        .bind(row.season_year)
        .bind(row.week)
        .bind(&row.player_name)
        .bind(&row.position)
        .bind(&row.nfl_team)
        .bind(row.fantasy_points)
        .bind(Json(&row.stats))
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting staging stats for player {}", row.player_id))?;
        Ok(())
    }

    async fn upsert_staging_matchup(&self, row: &StagingMatchupRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staging_matchups (
                league_id, roster_id, season_year, week, matchup_id, points,
                playoff_week_start, raw_data, processed, imported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, NOW())
            ON CONFLICT (league_id, roster_id, season_year, week) DO UPDATE SET
                matchup_id = EXCLUDED.matchup_id,
                points = EXCLUDED.points,
                playoff_week_start = EXCLUDED.playoff_week_start,
                raw_data = EXCLUDED.raw_data,
                processed = FALSE,
                imported_at = NOW()
            "#,
        )
        .bind(&row.league_id)
        .bind(row.roster_id)
        .bind(row.season_year)
        .bind(row.week)
        .bind(row.matchup_id)
        .bind(row.points)
        .bind(row.playoff_week_start)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting staging matchup for roster {}", row.roster_id))?;
        Ok(())
    }

    async fn upsert_staging_draft_pick(&self, row: &StagingDraftPickRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staging_draft_picks (
                league_id, draft_id, season_year, round, pick_no, roster_id, player_id,
                player_name, position, raw_data, processed, imported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, NOW())
            ON CONFLICT (draft_id, pick_no) DO UPDATE SET
                league_id = EXCLUDED.league_id,
                season_year = EXCLUDED.season_year,
                round = EXCLUDED.round,
                roster_id = EXCLUDED.roster_id,
                player_id = EXCLUDED.player_id,
                player_name = EXCLUDED.player_name,
                position = EXCLUDED.position,
                raw_data = EXCLUDED.raw_data,
                processed = FALSE,
                imported_at = NOW()
            "#,
        )
        .bind(&row.league_id)
        .bind(&row.draft_id)
        .bind(row.season_year)
        .bind(row.round)
        .bind(row.pick_no)
        .bind(row.roster_id)
        .bind(&row.player_id)
        .bind(&row.player_name)
        .bind(&row.position)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting staging draft pick {} of {}", row.pick_no, row.draft_id))?;
        Ok(())
    }

    async fn record_import_run(&self, summary: &ImportSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_runs (run_id, league_id, season_year, week, started_at, finished_at, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(summary.run_id)
        .bind(&summary.league_id)
        .bind(summary.season_year)
        .bind(summary.week)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(Json(summary))
        .execute(&self.pool)
        .await
        .context("recording import run")?;
        Ok(())
    }
}

#[async_trait]
impl PromotionStore for PgStore {
    async fn team_lookup(&self, league_id: &str, season_year: i32) -> Result<HashMap<i32, TeamRef>> {
        let rows = sqlx::query(
            r#"
            SELECT t.external_roster_id, t.id, t.manager_id
              FROM teams t
              JOIN seasons s ON s.year = t.season_year
             WHERE t.season_year = $1
               AND t.external_roster_id IS NOT NULL
               AND (s.league_id IS NULL OR s.league_id = $2)
            "#,
        )
        .bind(season_year)
        .bind(league_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading team lookup for league {league_id} season {season_year}"))?;

        let mut lookup = HashMap::with_capacity(rows.len());
        for row in rows {
            lookup.insert(
                row.try_get::<i32, _>("external_roster_id")?,
                TeamRef {
                    team_id: row.try_get("id")?,
                    manager_id: row.try_get("manager_id")?,
                },
            );
        }
        Ok(lookup)
    }

    async fn unprocessed_rosters(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingRoster>> {
        let rows = sqlx::query(
            r#"
            SELECT id, league_id, roster_id, season_year, week, starters, players,
                   player_lookup, roster_positions, playoff_week_start
              FROM staging_rosters
             WHERE league_id = $1 AND season_year = $2 AND week = $3 AND processed = FALSE
             ORDER BY roster_id
            "#,
        )
        .bind(league_id)
        .bind(season_year)
        .bind(week)
        .fetch_all(&self.pool)
        .await
        .context("loading unprocessed staging rosters")?;
        rows.into_iter().map(stored_roster).collect()
    }

    async fn upsert_roster_entry(&self, table: RosterTable, entry: &RosterEntry) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                season_year, week, team_id, manager_id, player_id, player_name,
                nfl_position, lineup_slot, is_starter, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (season_year, week, team_id, player_id) DO UPDATE SET
                manager_id = EXCLUDED.manager_id,
                player_name = EXCLUDED.player_name,
                nfl_position = EXCLUDED.nfl_position,
                lineup_slot = EXCLUDED.lineup_slot,
                is_starter = EXCLUDED.is_starter,
                updated_at = NOW()
            "#,
            table = table.table_name()
        );
        sqlx::query(&sql)
            .bind(entry.season_year)
            .bind(entry.week)
            .bind(entry.team_id)
            .bind(entry.manager_id)
            .bind(&entry.player_id)
            .bind(&entry.player_name)
            .bind(entry.nfl_position.as_str())
            .bind(entry.lineup_slot.as_str())
            .bind(entry.is_starter)
            .execute(&self.pool)
            .await
            .with_context(|| format!("upserting {} row for player {}", table.table_name(), entry.player_id))?;
        Ok(())
    }

    async fn mark_roster_processed(&self, staging_id: i64) -> Result<()> {
        self.mark_processed("staging_rosters", staging_id).await
    }

    async fn unprocessed_player_stats(&self, season_year: i32, week: i32) -> Result<Vec<StoredStagingPlayerStat>> {
        let rows = sqlx::query(
            r#"
            SELECT id, player_id, season_year, week, player_name, position, nfl_team, fantasy_points
              FROM staging_player_stats
             WHERE season_year = $1 AND week = $2 AND processed = FALSE
             ORDER BY player_id
            "#,
        )
        .bind(season_year)
        .bind(week)
        .fetch_all(&self.pool)
        .await
        .context("loading unprocessed staging player stats")?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredStagingPlayerStat {
                    id: row.try_get("id")?,
                    player_id: row.try_get("player_id")?,
                    season_year: row.try_get("season_year")?,
                    week: row.try_get("week")?,
                    player_name: row.try_get("player_name")?,
                    position: row.try_get("position")?,
                    nfl_team: row.try_get("nfl_team")?,
                    fantasy_points: row.try_get("fantasy_points")?,
                })
            })
            .collect()
    }

    async fn upsert_player_stat(&self, stat: &PlayerStatRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO player_stats (
                season_year, week, player_id, player_name, position, nfl_team, fantasy_points, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (season_year, week, player_id) DO UPDATE SET
                player_name = EXCLUDED.player_name,
                position = EXCLUDED.position,
                nfl_team = EXCLUDED.nfl_team,
                fantasy_points = EXCLUDED.fantasy_points,
                updated_at = NOW()
            "#,
        )
        .bind(stat.season_year)
        .bind(stat.week)
        .bind(&stat.player_id)
        .bind(&stat.player_name)
        .bind(stat.position.as_str())
        .bind(&stat.nfl_team)
        .bind(stat.fantasy_points)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting player stats for {}", stat.player_id))?;
        Ok(())
    }

    async fn backfill_roster_identity(&self, stat: &PlayerStatRecord) -> Result<u64> {
        let mut touched = 0;
        for table in [RosterTable::WeeklyRoster, RosterTable::PlayoffRoster] {
            let result = sqlx::query(&format!(
                r#"
                UPDATE {table}
                   SET player_name = $1, nfl_position = $2, updated_at = NOW()
                 WHERE season_year = $3 AND week = $4 AND player_id = $5
                "#,
                table = table.table_name()
            ))
            .bind(&stat.player_name)
            .bind(stat.position.as_str())
            .bind(stat.season_year)
            .bind(stat.week)
            .bind(&stat.player_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("backfilling {} for player {}", table.table_name(), stat.player_id))?;
            touched += result.rows_affected();
        }
        Ok(touched)
    }

    async fn mark_player_stat_processed(&self, staging_id: i64) -> Result<()> {
        self.mark_processed("staging_player_stats", staging_id).await
    }

    async fn unprocessed_matchups(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingMatchup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, roster_id, season_year, week, matchup_id, points, playoff_week_start
              FROM staging_matchups
             WHERE league_id = $1 AND season_year = $2 AND week = $3 AND processed = FALSE
             ORDER BY matchup_id, roster_id
            "#,
        )
        .bind(league_id)
        .bind(season_year)
        .bind(week)
        .fetch_all(&self.pool)
        .await
        .context("loading unprocessed staging matchups")?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredStagingMatchup {
                    id: row.try_get("id")?,
                    roster_id: row.try_get("roster_id")?,
                    season_year: row.try_get("season_year")?,
                    week: row.try_get("week")?,
                    matchup_id: row.try_get("matchup_id")?,
                    points: row.try_get("points")?,
                    playoff_week_start: row.try_get("playoff_week_start")?,
                })
            })
            .collect()
    }

    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO matchups (
                season_year, week, team1_id, team2_id, team1_score, team2_score, is_playoff, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (season_year, week, team1_id, team2_id) DO UPDATE SET
                team1_score = EXCLUDED.team1_score,
                team2_score = EXCLUDED.team2_score,
                is_playoff = EXCLUDED.is_playoff,
                updated_at = NOW()
            "#,
        )
        .bind(matchup.season_year)
        .bind(matchup.week)
        .bind(matchup.team1_id)
        .bind(matchup.team2_id)
        .bind(matchup.team1_score)
        .bind(matchup.team2_score)
        .bind(matchup.is_playoff)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting matchup {} vs {}", matchup.team1_id, matchup.team2_id))?;
        Ok(())
    }

    async fn mark_matchups_processed(&self, staging_ids: &[i64]) -> Result<()> {
        sqlx::query("UPDATE staging_matchups SET processed = TRUE WHERE id = ANY($1)")
            .bind(staging_ids)
            .execute(&self.pool)
            .await
            .context("marking staging matchups processed")?;
        Ok(())
    }

    async fn unprocessed_draft_picks(&self, league_id: &str, season_year: i32) -> Result<Vec<StoredStagingDraftPick>> {
        let rows = sqlx::query(
            r#"
            SELECT id, league_id, draft_id, season_year, round, pick_no, roster_id, player_id, player_name, position
              FROM staging_draft_picks
             WHERE league_id = $1 AND season_year = $2 AND processed = FALSE
             ORDER BY pick_no
            "#,
        )
        .bind(league_id)
        .bind(season_year)
        .fetch_all(&self.pool)
        .await
        .context("loading unprocessed staging draft picks")?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredStagingDraftPick {
                    id: row.try_get("id")?,
                    league_id: row.try_get("league_id")?,
                    draft_id: row.try_get("draft_id")?,
                    season_year: row.try_get("season_year")?,
                    round: row.try_get("round")?,
                    pick_no: row.try_get("pick_no")?,
                    roster_id: row.try_get("roster_id")?,
                    player_id: row.try_get("player_id")?,
                    player_name: row.try_get("player_name")?,
                    position: row.try_get("position")?,
                })
            })
            .collect()
    }

    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO draft_picks (
                season_year, pick_no, round, team_id, manager_id, player_id, player_name, position, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (season_year, pick_no) DO UPDATE SET
                round = EXCLUDED.round,
                team_id = EXCLUDED.team_id,
                manager_id = EXCLUDED.manager_id,
                player_id = EXCLUDED.player_id,
                player_name = EXCLUDED.player_name,
                position = EXCLUDED.position,
                updated_at = NOW()
            "#,
        )
        .bind(pick.season_year)
        .bind(pick.pick_no)
        .bind(pick.round)
        .bind(pick.team_id)
        .bind(pick.manager_id)
        .bind(&pick.player_id)
        .bind(&pick.player_name)
        .bind(pick.position.map(|p| p.as_str()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting draft pick {}", pick.pick_no))?;
        Ok(())
    }

    async fn mark_draft_pick_processed(&self, staging_id: i64) -> Result<()> {
        self.mark_processed("staging_draft_picks", staging_id).await
    }
}
