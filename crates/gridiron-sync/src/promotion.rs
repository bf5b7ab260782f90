//! Staging to production promotion.
//!
//! Each unprocessed staging row is decoded, validated, and written with an
//! upsert; a row is marked processed only once all of its production rows
//! have been written. Validation failures skip the player or row with a
//! warning. A persistence error aborts the rest of the batch and leaves
//! the remaining staging rows unprocessed for the next attempt.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use gridiron_core::{DraftPickRecord, MatchupRecord, PlayerStatRecord, Position, RosterEntry, RosterTable, TeamRef};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::staging::{DecodedRoster, StoredStagingMatchup};
use crate::store::PromotionStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromotionCounts {
    pub roster_entries: usize,
    pub player_stats: usize,
    pub matchups: usize,
    pub draft_picks: usize,
    /// Staging rows left unprocessed because they failed validation.
    pub skipped_rows: usize,
    /// Individual roster players skipped for an unusable position.
    pub skipped_players: usize,
}

impl PromotionCounts {
    pub fn processed(&self) -> usize {
        self.roster_entries + self.player_stats + self.matchups + self.draft_picks
    }

    fn absorb(&mut self, other: PromotionCounts) {
        self.roster_entries += other.roster_entries;
        self.player_stats += other.player_stats;
        self.matchups += other.matchups;
        self.draft_picks += other.draft_picks;
        self.skipped_rows += other.skipped_rows;
        self.skipped_players += other.skipped_players;
    }
}

/// Promote everything one league staged for a week, plus the season's
/// draft picks. Player stats are league-independent.
pub async fn promote_week<S>(store: &S, league_id: &str, season_year: i32, week: i32) -> Result<PromotionCounts>
where
    S: PromotionStore + ?Sized,
{
    let mut counts = PromotionCounts::default();
    counts.absorb(promote_rosters(store, league_id, season_year, week).await?);
    counts.absorb(promote_player_stats(store, season_year, week).await?);
    counts.absorb(promote_matchups(store, league_id, season_year, week).await?);
    counts.absorb(promote_draft_picks(store, league_id, season_year).await?);
    info!(
        league_id,
        season_year,
        week,
        roster_entries = counts.roster_entries,
        player_stats = counts.player_stats,
        matchups = counts.matchups,
        draft_picks = counts.draft_picks,
        skipped_rows = counts.skipped_rows,
        skipped_players = counts.skipped_players,
        "promotion finished"
    );
    Ok(counts)
}

/// Production entries for one decoded roster. Players whose position is
/// missing or not a fantasy position are left out and counted.
pub fn roster_entries(roster: &DecodedRoster, team: TeamRef) -> (Vec<RosterEntry>, usize) {
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (player_id, lineup_slot, is_starter) in roster.lineup() {
        let Some(nfl_position) = roster.lookup.position(&player_id).and_then(Position::parse) else {
            warn!(
                season_year = roster.season_year,
                week = roster.week,
                roster_id = roster.roster_id,
                player_id = %player_id,
                position = ?roster.lookup.position(&player_id),
                "skipping roster player without a valid position"
            );
            skipped += 1;
            continue;
        };
        let player_name = roster
            .lookup
            .name(&player_id)
            .map(str::to_string)
            .unwrap_or_else(|| crate::staging::unknown_player_name(&player_id));
        entries.push(RosterEntry {
            season_year: roster.season_year,
            week: roster.week,
            team_id: team.team_id,
            manager_id: team.manager_id,
            player_id,
            player_name,
            nfl_position,
            lineup_slot,
            is_starter,
        });
    }
    (entries, skipped)
}

pub async fn promote_rosters<S>(store: &S, league_id: &str, season_year: i32, week: i32) -> Result<PromotionCounts>
where
    S: PromotionStore + ?Sized,
{
    let mut counts = PromotionCounts::default();
    let rows = store.unprocessed_rosters(league_id, season_year, week).await?;
    if rows.is_empty() {
        return Ok(counts);
    }
    let teams = store.team_lookup(league_id, season_year).await?;

    for stored in rows {
        let staging_id = stored.id;
        let roster = match DecodedRoster::decode(stored) {
            Ok(roster) => roster,
            Err(err) => {
                warn!(season_year, week, staging_id, error = %format!("{err:#}"), "skipping undecodable staging roster");
                counts.skipped_rows += 1;
                continue;
            }
        };
        let Some(team) = teams.get(&roster.roster_id).copied() else {
            warn!(season_year, week, roster_id = roster.roster_id, "no team mapped to roster; leaving unprocessed");
            counts.skipped_rows += 1;
            continue;
        };

        let table = RosterTable::for_week(week, roster.playoff_week_start);
        let (entries, skipped) = roster_entries(&roster, team);
        for entry in &entries {
            store.upsert_roster_entry(table, entry).await?;
        }
        store.mark_roster_processed(staging_id).await?;
        debug!(roster_id = roster.roster_id, table = table.table_name(), written = entries.len(), "roster promoted");
        counts.roster_entries += entries.len();
        counts.skipped_players += skipped;
    }
    Ok(counts)
}

pub async fn promote_player_stats<S>(store: &S, season_year: i32, week: i32) -> Result<PromotionCounts>
where
    S: PromotionStore + ?Sized,
{
    let mut counts = PromotionCounts::default();
    for staged in store.unprocessed_player_stats(season_year, week).await? {
        let Some(position) = staged.position.as_deref().and_then(Position::parse) else {
            warn!(
                season_year,
                week,
                player_id = %staged.player_id,
                position = ?staged.position,
                "skipping player stats without a valid position"
            );
            counts.skipped_rows += 1;
            continue;
        };
        let record = PlayerStatRecord {
            season_year: staged.season_year,
            week: staged.week,
            player_id: staged.player_id,
            player_name: staged.player_name,
            position,
            nfl_team: staged.nfl_team,
            fantasy_points: staged.fantasy_points,
        };
        store.upsert_player_stat(&record).await?;
        store.backfill_roster_identity(&record).await?;
        store.mark_player_stat_processed(staged.id).await?;
        counts.player_stats += 1;
    }
    Ok(counts)
}

pub async fn promote_matchups<S>(store: &S, league_id: &str, season_year: i32, week: i32) -> Result<PromotionCounts>
where
    S: PromotionStore + ?Sized,
{
    let mut counts = PromotionCounts::default();
    let rows = store.unprocessed_matchups(league_id, season_year, week).await?;
    if rows.is_empty() {
        return Ok(counts);
    }
    let teams = store.team_lookup(league_id, season_year).await?;

    let mut groups: BTreeMap<i32, Vec<StoredStagingMatchup>> = BTreeMap::new();
    let mut byes = Vec::new();
    for row in rows {
        match row.matchup_id {
            Some(matchup_id) => groups.entry(matchup_id).or_default().push(row),
            None => byes.push(row.id),
        }
    }
    // A bye has nothing to promote; settle it so re-promotes stay quiet.
    if !byes.is_empty() {
        debug!(season_year, week, byes = byes.len(), "marking bye matchups processed");
        store.mark_matchups_processed(&byes).await?;
    }

    for (matchup_id, mut pair) in groups {
        if pair.len() != 2 {
            warn!(season_year, week, matchup_id, rows = pair.len(), "matchup group is not a pair; leaving unprocessed");
            counts.skipped_rows += pair.len();
            continue;
        }
        pair.sort_by_key(|row| row.roster_id);
        let (home, away) = (&pair[0], &pair[1]);
        let (Some(team1), Some(team2)) = (teams.get(&home.roster_id), teams.get(&away.roster_id)) else {
            warn!(season_year, week, matchup_id, "matchup references an unmapped roster; leaving unprocessed");
            counts.skipped_rows += 2;
            continue;
        };
        let record = MatchupRecord {
            season_year,
            week,
            team1_id: team1.team_id,
            team2_id: team2.team_id,
            team1_score: home.points,
            team2_score: away.points,
            is_playoff: RosterTable::for_week(week, home.playoff_week_start) == RosterTable::PlayoffRoster,
        };
        store.upsert_matchup(&record).await?;
        store.mark_matchups_processed(&[home.id, away.id]).await?;
        counts.matchups += 1;
    }
    Ok(counts)
}

pub async fn promote_draft_picks<S>(store: &S, league_id: &str, season_year: i32) -> Result<PromotionCounts>
where
    S: PromotionStore + ?Sized,
{
    let mut counts = PromotionCounts::default();
    let picks = store.unprocessed_draft_picks(league_id, season_year).await?;
    if picks.is_empty() {
        return Ok(counts);
    }
    let teams: HashMap<i32, TeamRef> = store.team_lookup(league_id, season_year).await?;

    for staged in picks {
        let Some(team) = staged.roster_id.and_then(|id| teams.get(&id)) else {
            warn!(season_year, pick_no = staged.pick_no, roster_id = ?staged.roster_id, "draft pick has no mapped team; leaving unprocessed");
            counts.skipped_rows += 1;
            continue;
        };
        let record = DraftPickRecord {
            season_year: staged.season_year,
            round: staged.round,
            pick_no: staged.pick_no,
            team_id: team.team_id,
            manager_id: team.manager_id,
            player_id: staged.player_id,
            player_name: staged.player_name,
            position: staged.position.as_deref().and_then(Position::parse),
        };
        store.upsert_draft_pick(&record).await?;
        store.mark_draft_pick_processed(staged.id).await?;
        counts.draft_picks += 1;
    }
    Ok(counts)
}
