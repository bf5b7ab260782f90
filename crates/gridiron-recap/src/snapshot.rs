//! Point-in-time snapshot of league state for one (season, week).
//!
//! Loaders restrict rows with SQL predicates; every aggregation below
//! re-applies the same cutoff so a loader that over-fetches still cannot
//! leak later weeks into the bundle.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use gridiron_core::{round_points, LineupSlot, Position, RecapRecord, WeekKey};
use serde::Serialize;

pub const BENCH_MISTAKE_THRESHOLD: f64 = 15.0;
pub const PREVIOUS_RECAP_LIMIT: usize = 10;

/// One completed head-to-head game, resolved to managers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRow {
    pub season_year: i32,
    pub week: i32,
    pub manager1_id: i32,
    pub manager1_name: String,
    pub manager2_id: i32,
    pub manager2_name: String,
    pub score1: f64,
    pub score2: f64,
    pub is_playoff: bool,
}

impl GameRow {
    pub fn key(&self) -> WeekKey {
        WeekKey::new(self.season_year, self.week)
    }

    fn involves(&self, a: i32, b: i32) -> bool {
        (self.manager1_id == a && self.manager2_id == b) || (self.manager1_id == b && self.manager2_id == a)
    }

    /// Result from `manager_id`'s point of view, with points for/against.
    fn result_for(&self, manager_id: i32) -> Option<(GameResult, f64, f64)> {
        let (own, other) = if self.manager1_id == manager_id {
            (self.score1, self.score2)
        } else if self.manager2_id == manager_id {
            (self.score2, self.score1)
        } else {
            return None;
        };
        let result = match own.partial_cmp(&other) {
            Some(Ordering::Greater) => GameResult::Win,
            Some(Ordering::Less) => GameResult::Loss,
            _ => GameResult::Tie,
        };
        Some((result, own, other))
    }
}

/// A rostered player for the target week with the points they scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterScoreRow {
    pub season_year: i32,
    pub week: i32,
    pub manager_id: i32,
    pub manager_name: String,
    pub player_id: String,
    pub player_name: String,
    pub nfl_position: Position,
    pub lineup_slot: LineupSlot,
    pub is_starter: bool,
    pub points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    Win,
    Loss,
    Tie,
}

impl GameResult {
    pub fn letter(&self) -> char {
        match self {
            GameResult::Win => 'W',
            GameResult::Loss => 'L',
            GameResult::Tie => 'T',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingRow {
    pub rank: usize,
    pub manager_id: i32,
    pub manager_name: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub points_against: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakRow {
    pub manager_id: i32,
    pub manager_name: String,
    pub result: GameResult,
    pub length: u32,
    /// Most recent result first.
    pub recent_form: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadToHead {
    pub games: u32,
    pub manager1_wins: u32,
    pub manager2_wins: u32,
    pub ties: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchupSummary {
    pub manager1_id: i32,
    pub manager1_name: String,
    pub manager1_score: f64,
    pub manager2_id: i32,
    pub manager2_name: String,
    pub manager2_score: f64,
    pub is_playoff: bool,
    pub margin: f64,
    pub head_to_head: HeadToHead,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineupPlayer {
    pub player_id: String,
    pub player_name: String,
    pub nfl_position: Position,
    pub lineup_slot: LineupSlot,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchMistake {
    pub manager_id: i32,
    pub manager_name: String,
    pub position: Position,
    pub bench_player: String,
    pub bench_points: f64,
    pub starter_player: String,
    pub starter_points: f64,
    pub points_left_on_bench: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamLineup {
    pub manager_id: i32,
    pub manager_name: String,
    pub starters: Vec<LineupPlayer>,
    pub bench: Vec<LineupPlayer>,
    pub starter_points: f64,
    pub bench_points: f64,
    pub mistakes: Vec<BenchMistake>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CareerRow {
    pub manager_id: i32,
    pub manager_name: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub seasons: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecapSnapshot {
    pub target: WeekKey,
    pub standings: Vec<StandingRow>,
    pub streaks: Vec<StreakRow>,
    pub matchups: Vec<MatchupSummary>,
    pub lineups: Vec<TeamLineup>,
    pub career: Vec<CareerRow>,
    pub previous_recaps: Vec<RecapRecord>,
}

impl RecapSnapshot {
    pub fn bench_mistakes(&self) -> impl Iterator<Item = &BenchMistake> {
        self.lineups.iter().flat_map(|lineup| lineup.mistakes.iter())
    }
}

/// Read side the snapshot is assembled from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Every game at or before `target`, across all seasons.
    async fn games_through(&self, target: WeekKey) -> Result<Vec<GameRow>>;
    /// Roster rows for exactly `target`, with each player's points.
    async fn roster_scores(&self, target: WeekKey) -> Result<Vec<RosterScoreRow>>;
    /// Stored recaps strictly before `target`, newest first.
    async fn recaps_before(&self, target: WeekKey, limit: usize) -> Result<Vec<RecapRecord>>;
}

pub async fn assemble_snapshot<S>(source: &S, target: WeekKey) -> Result<RecapSnapshot>
where
    S: SnapshotSource + ?Sized,
{
    let games = source.games_through(target).await?;
    let rosters = source.roster_scores(target).await?;
    let recaps = source.recaps_before(target, PREVIOUS_RECAP_LIMIT).await?;
    Ok(build_snapshot(target, &games, &rosters, recaps))
}

pub fn build_snapshot(
    target: WeekKey,
    games: &[GameRow],
    rosters: &[RosterScoreRow],
    recaps: Vec<RecapRecord>,
) -> RecapSnapshot {
    RecapSnapshot {
        target,
        standings: standings(games, target),
        streaks: streaks(games, target),
        matchups: week_matchups(games, target),
        lineups: lineup_breakdown(rosters, target),
        career: career_records(games, target),
        previous_recaps: previous_recaps(recaps, target),
    }
}

fn season_games_through(games: &[GameRow], target: WeekKey) -> impl Iterator<Item = &GameRow> {
    games
        .iter()
        .filter(move |g| g.season_year == target.season_year && g.week <= target.week)
}

struct Tally {
    name: String,
    wins: u32,
    losses: u32,
    ties: u32,
    points_for: f64,
    points_against: f64,
    seasons: std::collections::BTreeSet<i32>,
}

fn tally<'a>(games: impl Iterator<Item = &'a GameRow>) -> BTreeMap<i32, Tally> {
    let mut tallies: BTreeMap<i32, Tally> = BTreeMap::new();
    for game in games {
        for (id, name) in [
            (game.manager1_id, &game.manager1_name),
            (game.manager2_id, &game.manager2_name),
        ] {
            let Some((result, own, other)) = game.result_for(id) else { continue };
            let entry = tallies.entry(id).or_insert_with(|| Tally {
                name: name.clone(),
                wins: 0,
                losses: 0,
                ties: 0,
                points_for: 0.0,
                points_against: 0.0,
                seasons: Default::default(),
            });
            match result {
                GameResult::Win => entry.wins += 1,
                GameResult::Loss => entry.losses += 1,
                GameResult::Tie => entry.ties += 1,
            }
            entry.points_for += own;
            entry.points_against += other;
            entry.seasons.insert(game.season_year);
        }
    }
    tallies
}

/// Target season through the target week, ranked by wins then points for;
/// manager name breaks exact ties.
pub fn standings(games: &[GameRow], target: WeekKey) -> Vec<StandingRow> {
    let mut rows: Vec<StandingRow> = tally(season_games_through(games, target))
        .into_iter()
        .map(|(manager_id, t)| StandingRow {
            rank: 0,
            manager_id,
            manager_name: t.name,
            wins: t.wins,
            losses: t.losses,
            ties: t.ties,
            points_for: round_points(t.points_for),
            points_against: round_points(t.points_against),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| b.points_for.total_cmp(&a.points_for))
            .then_with(|| a.manager_name.cmp(&b.manager_name))
    });
    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = index + 1;
    }
    rows
}

/// Current run of identical results for each manager within the target
/// season, as of the target week.
pub fn streaks(games: &[GameRow], target: WeekKey) -> Vec<StreakRow> {
    let mut history: BTreeMap<i32, (String, Vec<(i32, GameResult)>)> = BTreeMap::new();
    for game in season_games_through(games, target) {
        for (id, name) in [
            (game.manager1_id, &game.manager1_name),
            (game.manager2_id, &game.manager2_name),
        ] {
            if let Some((result, _, _)) = game.result_for(id) {
                history
                    .entry(id)
                    .or_insert_with(|| (name.clone(), Vec::new()))
                    .1
                    .push((game.week, result));
            }
        }
    }

    let mut rows: Vec<StreakRow> = history
        .into_iter()
        .filter_map(|(manager_id, (manager_name, mut results))| {
            results.sort_by_key(|(week, _)| *week);
            let (_, last) = *results.last()?;
            let length = results.iter().rev().take_while(|(_, r)| *r == last).count() as u32;
            let recent_form = results.iter().rev().take(5).map(|(_, r)| r.letter()).collect();
            Some(StreakRow {
                manager_id,
                manager_name,
                result: last,
                length,
                recent_form,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.length.cmp(&a.length).then_with(|| a.manager_name.cmp(&b.manager_name)));
    rows
}

/// Games played in the target week, each with head-to-head history drawn
/// only from strictly earlier games.
pub fn week_matchups(games: &[GameRow], target: WeekKey) -> Vec<MatchupSummary> {
    games
        .iter()
        .filter(|g| g.key() == target)
        .map(|game| {
            let mut h2h = HeadToHead::default();
            for earlier in games.iter().filter(|g| g.key() < target) {
                if !earlier.involves(game.manager1_id, game.manager2_id) {
                    continue;
                }
                h2h.games += 1;
                match earlier.result_for(game.manager1_id) {
                    Some((GameResult::Win, _, _)) => h2h.manager1_wins += 1,
                    Some((GameResult::Loss, _, _)) => h2h.manager2_wins += 1,
                    _ => h2h.ties += 1,
                }
            }
            MatchupSummary {
                manager1_id: game.manager1_id,
                manager1_name: game.manager1_name.clone(),
                manager1_score: game.score1,
                manager2_id: game.manager2_id,
                manager2_name: game.manager2_name.clone(),
                manager2_score: game.score2,
                is_playoff: game.is_playoff,
                margin: round_points((game.score1 - game.score2).abs()),
                head_to_head: h2h,
            }
        })
        .collect()
}

/// Starter/bench split per manager for the target week. A bench player
/// above the threshold is paired with the lowest-scoring starter at the
/// same NFL position who scored less; each starter is paired at most once,
/// highest-scoring bench players first.
pub fn lineup_breakdown(rows: &[RosterScoreRow], target: WeekKey) -> Vec<TeamLineup> {
    let mut by_manager: BTreeMap<i32, Vec<&RosterScoreRow>> = BTreeMap::new();
    for row in rows
        .iter()
        .filter(|r| r.season_year == target.season_year && r.week == target.week)
    {
        by_manager.entry(row.manager_id).or_default().push(row);
    }

    by_manager
        .into_iter()
        .map(|(manager_id, players)| {
            let manager_name = players[0].manager_name.clone();
            let to_player = |r: &&RosterScoreRow| LineupPlayer {
                player_id: r.player_id.clone(),
                player_name: r.player_name.clone(),
                nfl_position: r.nfl_position,
                lineup_slot: r.lineup_slot,
                points: r.points,
            };
            let mut starters: Vec<LineupPlayer> = players.iter().filter(|r| r.is_starter).map(to_player).collect();
            let mut bench: Vec<LineupPlayer> = players.iter().filter(|r| !r.is_starter).map(to_player).collect();
            starters.sort_by(|a, b| a.lineup_slot.cmp(&b.lineup_slot).then(b.points.total_cmp(&a.points)));
            bench.sort_by(|a, b| b.points.total_cmp(&a.points));

            let mut paired = vec![false; starters.len()];
            let mut mistakes = Vec::new();
            for benched in bench.iter().filter(|p| p.points > BENCH_MISTAKE_THRESHOLD) {
                let candidate = starters
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| !paired[*i] && s.nfl_position == benched.nfl_position && s.points < benched.points)
                    .min_by(|(_, a), (_, b)| a.points.total_cmp(&b.points));
                if let Some((index, starter)) = candidate {
                    paired[index] = true;
                    mistakes.push(BenchMistake {
                        manager_id,
                        manager_name: manager_name.clone(),
                        position: benched.nfl_position,
                        bench_player: benched.player_name.clone(),
                        bench_points: benched.points,
                        starter_player: starter.player_name.clone(),
                        starter_points: starter.points,
                        points_left_on_bench: round_points(benched.points - starter.points),
                    });
                }
            }

            TeamLineup {
                manager_id,
                manager_name,
                starter_points: round_points(starters.iter().map(|p| p.points).sum()),
                bench_points: round_points(bench.iter().map(|p| p.points).sum()),
                starters,
                bench,
                mistakes,
            }
        })
        .collect()
}

/// All-time records across every season, through the target week.
pub fn career_records(games: &[GameRow], target: WeekKey) -> Vec<CareerRow> {
    let mut rows: Vec<CareerRow> = tally(games.iter().filter(|g| g.key() <= target))
        .into_iter()
        .map(|(manager_id, t)| CareerRow {
            manager_id,
            manager_name: t.name,
            wins: t.wins,
            losses: t.losses,
            ties: t.ties,
            points_for: round_points(t.points_for),
            seasons: t.seasons.len() as u32,
        })
        .collect();
    rows.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.manager_name.cmp(&b.manager_name)));
    rows
}

pub fn previous_recaps(mut recaps: Vec<RecapRecord>, target: WeekKey) -> Vec<RecapRecord> {
    recaps.retain(|r| WeekKey::new(r.season_year, r.week) < target);
    recaps.sort_by(|a, b| (b.season_year, b.week).cmp(&(a.season_year, a.week)));
    recaps.truncate(PREVIOUS_RECAP_LIMIT);
    recaps
}
