//! Staging ingestion: fetch one league-week from the data source and upsert
//! it into the staging tables. Nothing here touches production tables.

use anyhow::{Context, Result};
use gridiron_adapters::{AdapterContext, FantasyDataSource, PlayerDirectory, SourceError};
use gridiron_core::{points_for_position, Position, ScoringMode};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::player_cache::PlayerDirectoryCache;
use crate::staging::{
    resolve_player, PlayerLookupPayload, StagingDraftPickRow, StagingMatchupRow, StagingPlayerStatRow,
    StagingRosterRow,
};
use crate::store::StagingStore;

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub league_id: String,
    pub season_year: i32,
    pub week: i32,
    pub scoring_mode: ScoringMode,
    pub include_draft: bool,
    /// Takes precedence over the league settings' playoff start week.
    pub playoff_week_start_override: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StagedCounts {
    pub rosters: usize,
    pub player_stats: usize,
    pub matchups: usize,
    pub draft_picks: usize,
    pub unresolved_players: usize,
    pub stats_skipped: bool,
    pub matchups_skipped: bool,
}

/// Fetch league, rosters and the player directory concurrently (all
/// required), with matchups and weekly stats alongside (tolerated).
pub async fn stage_week<S>(
    source: &dyn FantasyDataSource,
    directory: &PlayerDirectoryCache,
    store: &S,
    request: &StageRequest,
) -> Result<StagedCounts>
where
    S: StagingStore + ?Sized,
{
    let ctx = AdapterContext::new(request.season_year, request.week);
    let span = info_span!(
        "stage_week",
        run_id = %ctx.run_id,
        league_id = %request.league_id,
        season_year = request.season_year,
        week = request.week
    );

    async move {
        let league_id = request.league_id.as_str();
        let (required, matchups, stats) = tokio::join!(
            async {
                tokio::try_join!(
                    source.league(&ctx, league_id),
                    source.rosters(&ctx, league_id),
                    directory.refresh_with(&ctx),
                )
            },
            source.matchups(&ctx, league_id),
            source.weekly_stats(&ctx),
        );
        let (league, rosters, players) = required.context("fetching league, rosters and player directory")?;
        let playoff_week_start = request
            .playoff_week_start_override
            .or(league.settings.playoff_week_start.filter(|week| *week > 0));

        let mut counts = StagedCounts::default();
        let template = league.lineup_template();

        for roster in rosters {
            let lookup = PlayerLookupPayload::build(roster.players.iter().chain(&roster.starters), &players);
            counts.unresolved_players += lookup.positions.values().filter(|p| p.is_none()).count();
            store
                .upsert_staging_roster(&StagingRosterRow {
                    league_id: league_id.to_string(),
                    roster_id: roster.roster_id,
                    season_year: request.season_year,
                    week: request.week,
                    owner_id: roster.owner_id,
                    starters: roster.starters,
                    players: roster.players,
                    player_lookup: lookup,
                    roster_positions: template.clone(),
                    playoff_week_start,
                    raw_data: roster.raw,
                })
                .await?;
            counts.rosters += 1;
        }

        match stats {
            Ok(stats) => {
                let mut player_ids: Vec<&String> = stats.lines.keys().collect();
                player_ids.sort();
                for player_id in player_ids {
                    let line = &stats.lines[player_id];
                    if !line.values().any(|v| *v != 0.0) {
                        continue;
                    }
                    let resolved = resolve_player(player_id, &players);
                    let position = resolved.position.as_deref().and_then(Position::parse);
                    store
                        .upsert_staging_player_stat(&StagingPlayerStatRow {
                            player_id: player_id.clone(),
                            season_year: request.season_year,
                            week: request.week,
                            player_name: resolved.name,
                            position: resolved.position,
                            nfl_team: resolved.team,
                            fantasy_points: points_for_position(line, request.scoring_mode, position),
                            stats: line.clone(),
                            raw_data: stats.raw.get(player_id).cloned().unwrap_or_default(),
                        })
                        .await?;
                    counts.player_stats += 1;
                }
            }
            Err(err) => {
                skip_optional("weekly stats", &err)?;
                counts.stats_skipped = true;
            }
        }

        match matchups {
            Ok(matchups) => {
                for matchup in matchups {
                    store
                        .upsert_staging_matchup(&StagingMatchupRow {
                            league_id: league_id.to_string(),
                            roster_id: matchup.roster_id,
                            season_year: request.season_year,
                            week: request.week,
                            matchup_id: matchup.matchup_id,
                            points: matchup.points.unwrap_or(0.0),
                            playoff_week_start,
                            raw_data: matchup.raw,
                        })
                        .await?;
                    counts.matchups += 1;
                }
            }
            Err(err) => {
                skip_optional("matchups", &err)?;
                counts.matchups_skipped = true;
            }
        }

        if request.include_draft {
            counts.draft_picks = stage_draft_picks(source, &ctx, store, league_id, &players).await?;
        }

        info!(
            rosters = counts.rosters,
            player_stats = counts.player_stats,
            matchups = counts.matchups,
            draft_picks = counts.draft_picks,
            unresolved_players = counts.unresolved_players,
            "staging finished"
        );
        Ok(counts)
    }
    .instrument(span)
    .await
}

/// Upstream failures on optional resources are skipped; local faults are not.
fn skip_optional(resource: &str, err: &SourceError) -> Result<()> {
    if err.is_upstream() {
        warn!(resource, error = %err, "optional resource unavailable; skipping");
        Ok(())
    } else {
        Err(anyhow::anyhow!("fetching {resource}: {err}"))
    }
}

async fn stage_draft_picks<S>(
    source: &dyn FantasyDataSource,
    ctx: &AdapterContext,
    store: &S,
    league_id: &str,
    players: &PlayerDirectory,
) -> Result<usize>
where
    S: StagingStore + ?Sized,
{
    let drafts = match source.drafts(ctx, league_id).await {
        Ok(drafts) => drafts,
        Err(err) => {
            skip_optional("drafts", &err)?;
            return Ok(0);
        }
    };
    let season = ctx.season_year.to_string();
    let mut staged = 0;
    for draft in drafts.iter().filter(|d| d.season.as_deref().map_or(true, |s| s == season)) {
        let picks = match source.draft_picks(ctx, &draft.draft_id).await {
            Ok(picks) => picks,
            Err(err) => {
                skip_optional("draft picks", &err)?;
                continue;
            }
        };
        for pick in picks {
            let resolved = resolve_player(&pick.player_id, players);
            let metadata_name = [pick.metadata.first_name.as_deref(), pick.metadata.last_name.as_deref()]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let player_name = if metadata_name.is_empty() { resolved.name } else { metadata_name };
            store
                .upsert_staging_draft_pick(&StagingDraftPickRow {
                    league_id: league_id.to_string(),
                    draft_id: draft.draft_id.clone(),
                    season_year: ctx.season_year,
                    round: pick.round,
                    pick_no: pick.pick_no,
                    roster_id: pick.roster_id,
                    player_id: pick.player_id,
                    player_name,
                    position: pick.metadata.position.or(resolved.position),
                    raw_data: pick.raw,
                })
                .await?;
            staged += 1;
        }
    }
    Ok(staged)
}
