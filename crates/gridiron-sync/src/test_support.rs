//! In-memory store and fixture wiring for pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use gridiron_adapters::{
    AdapterContext, DraftPickPayload, DraftSummary, FantasyDataSource, FixtureSource, LeagueInfo, MatchupPayload,
    NflState, PlayerDirectory, RosterPayload, SourceError, WeeklyStats,
};
use gridiron_core::{DraftPickRecord, MatchupRecord, PlayerStatRecord, RosterEntry, RosterTable, TeamRef};
use serde_json::Value as JsonValue;

use crate::staging::{
    StagingDraftPickRow, StagingMatchupRow, StagingPlayerStatRow, StagingRosterRow, StoredStagingDraftPick,
    StoredStagingMatchup, StoredStagingPlayerStat, StoredStagingRoster,
};
use crate::store::{PromotionStore, StagingStore};
use crate::{ImportPipeline, ImportSummary, SyncConfig};

pub const FIXTURE_LEAGUE: &str = "fixture-league";

pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sleeper")
}

pub fn fixture_source() -> Arc<dyn FantasyDataSource> {
    Arc::new(FixtureSource::new(fixture_root()))
}

pub fn fixture_config() -> SyncConfig {
    SyncConfig {
        league_id: Some(FIXTURE_LEAGUE.to_string()),
        artifacts_dir: None,
        playoff_week_start: None,
        scoring_mode: Default::default(),
        ..SyncConfig::from_env()
    }
}

pub fn fixture_pipeline(store: Arc<MemoryStore>) -> ImportPipeline {
    ImportPipeline::new(fixture_config(), fixture_source(), store)
}

type RosterKey = (i32, i32, i32, String);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionSnapshot {
    weekly_roster: BTreeMap<RosterKey, RosterEntry>,
    playoff_roster: BTreeMap<RosterKey, RosterEntry>,
    player_stats: BTreeMap<(i32, i32, String), PlayerStatRecord>,
    matchups: BTreeMap<(i32, i32, i32, i32), MatchupRecord>,
    draft_picks: BTreeMap<(i32, i32), DraftPickRecord>,
}

#[derive(Default)]
pub struct MemoryState {
    next_id: i64,
    roster_write_budget: Option<usize>,
    pub teams: HashMap<(i32, i32), TeamRef>,
    pub season_leagues: HashMap<i32, String>,
    pub staging_rosters: BTreeMap<(String, i32, i32, i32), (StoredStagingRoster, bool)>,
    pub staging_stats: BTreeMap<(String, i32, i32), (StoredStagingPlayerStat, bool)>,
    pub staging_matchups: BTreeMap<(String, i32, i32, i32), (StoredStagingMatchup, bool)>,
    pub staging_picks: BTreeMap<(String, i32), (StoredStagingDraftPick, bool)>,
    pub weekly_roster: BTreeMap<RosterKey, RosterEntry>,
    pub playoff_roster: BTreeMap<RosterKey, RosterEntry>,
    pub player_stats: BTreeMap<(i32, i32, String), PlayerStatRecord>,
    pub matchups: BTreeMap<(i32, i32, i32, i32), MatchupRecord>,
    pub draft_picks: BTreeMap<(i32, i32), DraftPickRecord>,
    pub runs: Vec<ImportSummary>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn weekly_roster_get(&self, season: i32, week: i32, team: i32, player: &str) -> Option<&RosterEntry> {
        self.weekly_roster.get(&(season, week, team, player.to_string()))
    }

    pub fn weekly_roster_entry(&self, season: i32, week: i32, team: i32, player: &str) -> &RosterEntry {
        self.weekly_roster_get(season, week, team, player)
            .unwrap_or_else(|| panic!("no weekly_roster row for team {team} player {player}"))
    }

    pub fn player_stat(&self, season: i32, week: i32, player: &str) -> &PlayerStatRecord {
        &self.player_stats[&(season, week, player.to_string())]
    }

    pub fn production_snapshot(&self) -> ProductionSnapshot {
        ProductionSnapshot {
            weekly_roster: self.weekly_roster.clone(),
            playoff_roster: self.playoff_roster.clone(),
            player_stats: self.player_stats.clone(),
            matchups: self.matchups.clone(),
            draft_picks: self.draft_picks.clone(),
        }
    }
}

/// Keeps the same natural keys and `processed` semantics as the Postgres
/// tables.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Team ids are `100 + roster`, manager ids `10 + roster`. The season
    /// belongs to the fixture league.
    pub fn with_teams(season_year: i32, roster_ids: &[i32]) -> Self {
        let store = Self::default();
        {
            let mut state = store.state();
            state.season_leagues.insert(season_year, FIXTURE_LEAGUE.to_string());
            for roster_id in roster_ids {
                state.teams.insert(
                    (season_year, *roster_id),
                    TeamRef {
                        team_id: 100 + roster_id,
                        manager_id: 10 + roster_id,
                    },
                );
            }
        }
        store
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_roster_writes_after(&self, successful_writes: usize) {
        self.state().roster_write_budget = Some(successful_writes);
    }

    pub fn clear_failures(&self) {
        self.state().roster_write_budget = None;
    }

    /// A roster row as older imports stored it: every field string-encoded
    /// and a positions-only lookup.
    pub fn insert_legacy_roster(&self, season_year: i32, week: i32, roster_id: i32, starters: &[&str], lookup: &str) {
        let mut state = self.state();
        let id = state.allocate_id();
        let encoded_starters = serde_json::to_string(starters).unwrap();
        let template: Vec<&str> = starters.iter().map(|_| "FLEX").collect();
        state.staging_rosters.insert(
            (FIXTURE_LEAGUE.to_string(), roster_id, season_year, week),
            (
                StoredStagingRoster {
                    id,
                    league_id: FIXTURE_LEAGUE.to_string(),
                    roster_id,
                    season_year,
                    week,
                    starters: JsonValue::String(encoded_starters.clone()),
                    players: JsonValue::String(encoded_starters),
                    player_lookup: JsonValue::String(lookup.to_string()),
                    roster_positions: JsonValue::String(serde_json::to_string(&template).unwrap()),
                    playoff_week_start: None,
                },
                false,
            ),
        );
    }

    pub fn insert_staged_stat(&self, season_year: i32, week: i32, player_id: &str, name: &str, position: &str, points: f64) {
        let mut state = self.state();
        let id = state.allocate_id();
        state.staging_stats.insert(
            (player_id.to_string(), season_year, week),
            (
                StoredStagingPlayerStat {
                    id,
                    player_id: player_id.to_string(),
                    season_year,
                    week,
                    player_name: name.to_string(),
                    position: Some(position.to_string()),
                    nfl_team: None,
                    fantasy_points: points,
                },
                false,
            ),
        );
    }
}

fn mark(rows: &mut BTreeMap<impl Ord, (impl HasId, bool)>, staging_id: i64) {
    for (row, processed) in rows.values_mut() {
        if row.id() == staging_id {
            *processed = true;
        }
    }
}

trait HasId {
    fn id(&self) -> i64;
}

impl HasId for StoredStagingRoster {
    fn id(&self) -> i64 {
        self.id
    }
}
impl HasId for StoredStagingPlayerStat {
    fn id(&self) -> i64 {
        self.id
    }
}
impl HasId for StoredStagingMatchup {
    fn id(&self) -> i64 {
        self.id
    }
}
impl HasId for StoredStagingDraftPick {
    fn id(&self) -> i64 {
        self.id
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    async fn upsert_staging_roster(&self, row: &StagingRosterRow) -> Result<()> {
        let mut state = self.state();
        let key = (row.league_id.clone(), row.roster_id, row.season_year, row.week);
        let id = match state.staging_rosters.get(&key) {
            Some((existing, _)) => existing.id,
            None => state.allocate_id(),
        };
        let stored = StoredStagingRoster {
            id,
            league_id: row.league_id.clone(),
            roster_id: row.roster_id,
            season_year: row.season_year,
            week: row.week,
            starters: serde_json::to_value(&row.starters)?,
            players: serde_json::to_value(&row.players)?,
            player_lookup: serde_json::to_value(&row.player_lookup)?,
            roster_positions: serde_json::to_value(&row.roster_positions)?,
            playoff_week_start: row.playoff_week_start,
        };
        state.staging_rosters.insert(key, (stored, false));
        Ok(())
    }

    async fn upsert_staging_player_stat(&self, row: &StagingPlayerStatRow) -> Result<()> {
        let mut state = self.state();
        let key = (row.player_id.clone(), row.season_year, row.week);
        let id = match state.staging_stats.get(&key) {
            Some((existing, _)) => existing.id,
            None => state.allocate_id(),
        };
        let stored = StoredStagingPlayerStat {
            id,
            player_id: row.player_id.clone(),
            season_year: row.season_year,
            week: row.week,
            player_name: row.player_name.clone(),
            position: row.position.clone(),
            nfl_team: row.nfl_team.clone(),
            fantasy_points: row.fantasy_points,
        };
        state.staging_stats.insert(key, (stored, false));
        Ok(())
    }

    async fn upsert_staging_matchup(&self, row: &StagingMatchupRow) -> Result<()> {
        let mut state = self.state();
        let key = (row.league_id.clone(), row.roster_id, row.season_year, row.week);
        let id = match state.staging_matchups.get(&key) {
            Some((existing, _)) => existing.id,
            None => state.allocate_id(),
        };
        let stored = StoredStagingMatchup {
            id,
            roster_id: row.roster_id,
            season_year: row.season_year,
            week: row.week,
            matchup_id: row.matchup_id,
            points: row.points,
            playoff_week_start: row.playoff_week_start,
        };
        state.staging_matchups.insert(key, (stored, false));
        Ok(())
    }

    async fn upsert_staging_draft_pick(&self, row: &StagingDraftPickRow) -> Result<()> {
        let mut state = self.state();
        let key = (row.draft_id.clone(), row.pick_no);
        let id = match state.staging_picks.get(&key) {
            Some((existing, _)) => existing.id,
            None => state.allocate_id(),
        };
        let stored = StoredStagingDraftPick {
            id,
            league_id: row.league_id.clone(),
            draft_id: row.draft_id.clone(),
            season_year: row.season_year,
            round: row.round,
            pick_no: row.pick_no,
            roster_id: row.roster_id,
            player_id: row.player_id.clone(),
            player_name: row.player_name.clone(),
            position: row.position.clone(),
        };
        state.staging_picks.insert(key, (stored, false));
        Ok(())
    }

    async fn record_import_run(&self, summary: &ImportSummary) -> Result<()> {
        self.state().runs.push(summary.clone());
        Ok(())
    }
}

#[async_trait]
impl PromotionStore for MemoryStore {
    async fn team_lookup(&self, league_id: &str, season_year: i32) -> Result<HashMap<i32, TeamRef>> {
        let state = self.state();
        if state.season_leagues.get(&season_year).is_some_and(|owner| owner != league_id) {
            return Ok(HashMap::new());
        }
        Ok(state
            .teams
            .iter()
            .filter(|((season, _), _)| *season == season_year)
            .map(|((_, roster_id), team)| (*roster_id, *team))
            .collect())
    }

    async fn unprocessed_rosters(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingRoster>> {
        Ok(self
            .state()
            .staging_rosters
            .values()
            .filter(|(row, processed)| {
                !processed && row.league_id == league_id && row.season_year == season_year && row.week == week
            })
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn upsert_roster_entry(&self, table: RosterTable, entry: &RosterEntry) -> Result<()> {
        let mut state = self.state();
        if let Some(budget) = state.roster_write_budget.as_mut() {
            if *budget == 0 {
                bail!("simulated write failure for player {}", entry.player_id);
            }
            *budget -= 1;
        }
        let key = (entry.season_year, entry.week, entry.team_id, entry.player_id.clone());
        let rows = match table {
            RosterTable::WeeklyRoster => &mut state.weekly_roster,
            RosterTable::PlayoffRoster => &mut state.playoff_roster,
        };
        rows.insert(key, entry.clone());
        Ok(())
    }

    async fn mark_roster_processed(&self, staging_id: i64) -> Result<()> {
        mark(&mut self.state().staging_rosters, staging_id);
        Ok(())
    }

    async fn unprocessed_player_stats(&self, season_year: i32, week: i32) -> Result<Vec<StoredStagingPlayerStat>> {
        Ok(self
            .state()
            .staging_stats
            .values()
            .filter(|(row, processed)| !processed && row.season_year == season_year && row.week == week)
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn upsert_player_stat(&self, stat: &PlayerStatRecord) -> Result<()> {
        self.state()
            .player_stats
            .insert((stat.season_year, stat.week, stat.player_id.clone()), stat.clone());
        Ok(())
    }

    async fn backfill_roster_identity(&self, stat: &PlayerStatRecord) -> Result<u64> {
        let mut state = self.state();
        let mut touched = 0;
        let MemoryState {
            weekly_roster,
            playoff_roster,
            ..
        } = &mut *state;
        for entry in weekly_roster.values_mut().chain(playoff_roster.values_mut()) {
            if entry.season_year == stat.season_year && entry.week == stat.week && entry.player_id == stat.player_id {
                entry.player_name = stat.player_name.clone();
                entry.nfl_position = stat.position;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mark_player_stat_processed(&self, staging_id: i64) -> Result<()> {
        mark(&mut self.state().staging_stats, staging_id);
        Ok(())
    }

    async fn unprocessed_matchups(&self, league_id: &str, season_year: i32, week: i32) -> Result<Vec<StoredStagingMatchup>> {
        Ok(self
            .state()
            .staging_matchups
            .iter()
            .filter(|((league, ..), (row, processed))| {
                !processed && league == league_id && row.season_year == season_year && row.week == week
            })
            .map(|(_, (row, _))| row.clone())
            .collect())
    }

    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<()> {
        self.state().matchups.insert(
            (matchup.season_year, matchup.week, matchup.team1_id, matchup.team2_id),
            matchup.clone(),
        );
        Ok(())
    }

    async fn mark_matchups_processed(&self, staging_ids: &[i64]) -> Result<()> {
        let mut state = self.state();
        for id in staging_ids {
            mark(&mut state.staging_matchups, *id);
        }
        Ok(())
    }

    async fn unprocessed_draft_picks(&self, league_id: &str, season_year: i32) -> Result<Vec<StoredStagingDraftPick>> {
        Ok(self
            .state()
            .staging_picks
            .values()
            .filter(|(row, processed)| !processed && row.league_id == league_id && row.season_year == season_year)
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<()> {
        self.state()
            .draft_picks
            .insert((pick.season_year, pick.pick_no), pick.clone());
        Ok(())
    }

    async fn mark_draft_pick_processed(&self, staging_id: i64) -> Result<()> {
        mark(&mut self.state().staging_picks, staging_id);
        Ok(())
    }
}

/// Fixture source that counts player directory fetches.
pub struct CountingSource {
    inner: FixtureSource,
    directory_calls: AtomicUsize,
    directory_week: Mutex<Option<(i32, i32)>>,
}

impl CountingSource {
    pub fn fixtures() -> Self {
        Self {
            inner: FixtureSource::new(fixture_root()),
            directory_calls: AtomicUsize::new(0),
            directory_week: Mutex::new(None),
        }
    }

    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }

    pub fn last_directory_week(&self) -> Option<(i32, i32)> {
        *self.directory_week.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FantasyDataSource for CountingSource {
    fn source_id(&self) -> &'static str {
        "counting-fixture"
    }

    async fn league(&self, ctx: &AdapterContext, league_id: &str) -> Result<LeagueInfo, SourceError> {
        self.inner.league(ctx, league_id).await
    }

    async fn rosters(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<RosterPayload>, SourceError> {
        self.inner.rosters(ctx, league_id).await
    }

    async fn matchups(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<MatchupPayload>, SourceError> {
        self.inner.matchups(ctx, league_id).await
    }

    async fn player_directory(&self, ctx: &AdapterContext) -> Result<PlayerDirectory, SourceError> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        *self.directory_week.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((ctx.season_year, ctx.week));
        self.inner.player_directory(ctx).await
    }

    async fn weekly_stats(&self, ctx: &AdapterContext) -> Result<WeeklyStats, SourceError> {
        self.inner.weekly_stats(ctx).await
    }

    async fn drafts(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<DraftSummary>, SourceError> {
        self.inner.drafts(ctx, league_id).await
    }

    async fn draft_picks(&self, ctx: &AdapterContext, draft_id: &str) -> Result<Vec<DraftPickPayload>, SourceError> {
        self.inner.draft_picks(ctx, draft_id).await
    }

    async fn nfl_state(&self) -> Result<NflState, SourceError> {
        self.inner.nfl_state().await
    }
}
