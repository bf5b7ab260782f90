//! External fantasy data source contract plus the HTTP (Sleeper-shaped) and
//! fixture-backed implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridiron_core::{PlayerInfo, StatMap};
use gridiron_storage::{ArchiveKey, FetchError, HttpFetcher, PayloadArchive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_API_BASE_URL: &str = "https://api.sleeper.app/v1";

/// Per-call context: which import run is asking, and for which week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub season_year: i32,
    pub week: i32,
    pub requested_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(season_year: i32, week: i32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            season_year,
            week,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{resource} is unavailable")]
    Unavailable { resource: String },
    #[error("unexpected payload for {resource}: {message}")]
    Payload { resource: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    /// Upstream-data failures (bad status, malformed or missing payloads)
    /// as opposed to local faults.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SourceError::Fetch(_) | SourceError::Unavailable { .. } | SourceError::Payload { .. }
        )
    }

    fn payload(resource: &str, message: impl Into<String>) -> Self {
        SourceError::Payload {
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

/// Sleeper sends `null` rather than omitting empty lists and objects.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeagueSettings {
    #[serde(default)]
    pub playoff_week_start: Option<i32>,
    #[serde(default)]
    pub num_teams: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueInfo {
    pub league_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roster_positions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: LeagueSettings,
}

impl LeagueInfo {
    /// Ordered starting-slot labels (bench/IR/taxi removed).
    pub fn lineup_template(&self) -> Vec<String> {
        self.roster_positions
            .iter()
            .filter(|label| gridiron_core::LineupSlot::is_starting_label(label))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterPayload {
    pub roster_id: i32,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub starters: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: Vec<String>,
    #[serde(skip)]
    pub raw: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupPayload {
    pub roster_id: i32,
    #[serde(default)]
    pub matchup_id: Option<i32>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(skip)]
    pub raw: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub draft_id: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub draft_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPickMetadata {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickPayload {
    pub round: i32,
    pub pick_no: i32,
    #[serde(default)]
    pub roster_id: Option<i32>,
    pub player_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: DraftPickMetadata,
    #[serde(skip)]
    pub raw: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NflState {
    pub season: String,
    pub week: i32,
    #[serde(default)]
    pub season_type: Option<String>,
}

impl NflState {
    pub fn season_year(&self) -> Option<i32> {
        self.season.trim().parse().ok()
    }

    /// Most recent week whose games are complete.
    pub fn last_completed_week(&self) -> Option<i32> {
        (self.week > 1).then_some(self.week - 1)
    }
}

pub type PlayerDirectory = HashMap<String, PlayerInfo>;

/// Stat lines keyed by external player id, plus the raw per-player objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyStats {
    pub lines: HashMap<String, StatMap>,
    pub raw: HashMap<String, JsonValue>,
}

#[async_trait]
pub trait FantasyDataSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn league(&self, ctx: &AdapterContext, league_id: &str) -> Result<LeagueInfo, SourceError>;

    async fn rosters(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<RosterPayload>, SourceError>;

    async fn matchups(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<MatchupPayload>, SourceError>;

    async fn player_directory(&self, ctx: &AdapterContext) -> Result<PlayerDirectory, SourceError>;

    async fn weekly_stats(&self, ctx: &AdapterContext) -> Result<WeeklyStats, SourceError>;

    async fn drafts(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<DraftSummary>, SourceError>;

    async fn draft_picks(&self, ctx: &AdapterContext, draft_id: &str) -> Result<Vec<DraftPickPayload>, SourceError>;

    async fn nfl_state(&self) -> Result<NflState, SourceError>;
}

fn decode<T: DeserializeOwned>(resource: &str, value: JsonValue) -> Result<T, SourceError> {
    serde_json::from_value(value).map_err(|e| SourceError::payload(resource, e.to_string()))
}

/// Sleeper answers `null` for leagues/weeks that have no data yet.
fn array_items(resource: &str, value: JsonValue) -> Result<Vec<JsonValue>, SourceError> {
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => Ok(items),
        other => Err(SourceError::payload(
            resource,
            format!("expected array, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub fn parse_league(value: JsonValue) -> Result<LeagueInfo, SourceError> {
    decode("league", value)
}

pub fn parse_rosters(value: JsonValue) -> Result<Vec<RosterPayload>, SourceError> {
    array_items("rosters", value)?
        .into_iter()
        .map(|item| {
            let mut roster: RosterPayload = decode("rosters", item.clone())?;
            roster.raw = item;
            Ok(roster)
        })
        .collect()
}

pub fn parse_matchups(value: JsonValue) -> Result<Vec<MatchupPayload>, SourceError> {
    array_items("matchups", value)?
        .into_iter()
        .map(|item| {
            let mut matchup: MatchupPayload = decode("matchups", item.clone())?;
            matchup.raw = item;
            Ok(matchup)
        })
        .collect()
}

pub fn parse_drafts(value: JsonValue) -> Result<Vec<DraftSummary>, SourceError> {
    array_items("drafts", value)?
        .into_iter()
        .map(|item| decode("drafts", item))
        .collect()
}

pub fn parse_draft_picks(value: JsonValue) -> Result<Vec<DraftPickPayload>, SourceError> {
    array_items("draft_picks", value)?
        .into_iter()
        .map(|item| {
            let mut pick: DraftPickPayload = decode("draft_picks", item.clone())?;
            pick.raw = item;
            Ok(pick)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

/// Directory entries are keyed by player id; the key is authoritative even
/// when the entry repeats it.
pub fn parse_player_directory(value: JsonValue) -> Result<PlayerDirectory, SourceError> {
    let JsonValue::Object(map) = value else {
        return Err(SourceError::payload("players", "expected object keyed by player id"));
    };
    let mut directory = PlayerDirectory::with_capacity(map.len());
    for (player_id, entry) in map {
        match serde_json::from_value::<DirectoryEntry>(entry) {
            Ok(entry) => {
                directory.insert(
                    player_id.clone(),
                    PlayerInfo {
                        player_id,
                        full_name: entry.full_name,
                        first_name: entry.first_name,
                        last_name: entry.last_name,
                        position: entry.position,
                        team: entry.team,
                    },
                );
            }
            Err(err) => debug!(%player_id, error = %err, "skipping unreadable directory entry"),
        }
    }
    Ok(directory)
}

/// Keep numeric stats only; providers mix in strings and nulls.
pub fn parse_weekly_stats(value: JsonValue) -> Result<WeeklyStats, SourceError> {
    let JsonValue::Object(map) = value else {
        return Err(SourceError::payload("stats", "expected object keyed by player id"));
    };
    let mut stats = WeeklyStats::default();
    for (player_id, raw) in map {
        let JsonValue::Object(fields) = &raw else {
            continue;
        };
        let line = fields
            .iter()
            .filter_map(|(key, v)| v.as_f64().map(|n| (key.clone(), n)))
            .collect::<StatMap>();
        stats.lines.insert(player_id.clone(), line);
        stats.raw.insert(player_id, raw);
    }
    Ok(stats)
}

/// Live HTTP source against a Sleeper-compatible read-only API.
#[derive(Debug)]
pub struct SleeperSource {
    base_url: String,
    http: HttpFetcher,
    archive: Option<PayloadArchive>,
}

impl SleeperSource {
    pub fn new(base_url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: PayloadArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json(
        &self,
        ctx: Option<&AdapterContext>,
        resource: &str,
        path: &str,
    ) -> Result<JsonValue, SourceError> {
        let url = self.url(path);
        let (value, response) = self.http.fetch_json::<JsonValue>(resource, &url).await?;

        if let (Some(archive), Some(ctx)) = (&self.archive, ctx) {
            let week = (resource != "players" && resource != "drafts").then_some(ctx.week);
            let key = ArchiveKey::new(ctx.season_year, week, resource);
            if let Err(err) = archive.store(&key, &response.body).await {
                warn!(run_id = %ctx.run_id, resource, error = %err, "failed to archive raw payload");
            }
        }
        Ok(value)
    }
}

#[async_trait]
impl FantasyDataSource for SleeperSource {
    fn source_id(&self) -> &'static str {
        "sleeper"
    }

    async fn league(&self, ctx: &AdapterContext, league_id: &str) -> Result<LeagueInfo, SourceError> {
        parse_league(self.get_json(Some(ctx), "league", &format!("league/{league_id}")).await?)
    }

    async fn rosters(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<RosterPayload>, SourceError> {
        parse_rosters(
            self.get_json(Some(ctx), "rosters", &format!("league/{league_id}/rosters"))
                .await?,
        )
    }

    async fn matchups(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<MatchupPayload>, SourceError> {
        parse_matchups(
            self.get_json(
                Some(ctx),
                "matchups",
                &format!("league/{league_id}/matchups/{}", ctx.week),
            )
            .await?,
        )
    }

    async fn player_directory(&self, ctx: &AdapterContext) -> Result<PlayerDirectory, SourceError> {
        parse_player_directory(self.get_json(Some(ctx), "players", "players/nfl").await?)
    }

    async fn weekly_stats(&self, ctx: &AdapterContext) -> Result<WeeklyStats, SourceError> {
        parse_weekly_stats(
            self.get_json(
                Some(ctx),
                "stats",
                &format!("stats/nfl/regular/{}/{}", ctx.season_year, ctx.week),
            )
            .await?,
        )
    }

    async fn drafts(&self, ctx: &AdapterContext, league_id: &str) -> Result<Vec<DraftSummary>, SourceError> {
        parse_drafts(
            self.get_json(Some(ctx), "drafts", &format!("league/{league_id}/drafts"))
                .await?,
        )
    }

    async fn draft_picks(&self, ctx: &AdapterContext, draft_id: &str) -> Result<Vec<DraftPickPayload>, SourceError> {
        parse_draft_picks(
            self.get_json(Some(ctx), "drafts", &format!("draft/{draft_id}/picks"))
                .await?,
        )
    }

    async fn nfl_state(&self) -> Result<NflState, SourceError> {
        decode("state", self.get_json(None, "state", "state/nfl").await?)
    }
}

/// Reads recorded API responses from a directory laid out as
/// `league.json`, `rosters.json`, `players.json`, `state.json`,
/// `drafts.json`, `matchups_week_{w}.json`, `stats_{season}_{w}.json` and
/// `draft_picks_{draft_id}.json`. A missing file behaves like an upstream
/// outage for that resource.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
}

impl FixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, resource: &str, file_name: &str) -> Result<JsonValue, SourceError> {
        let path = self.root.join(file_name);
        if !path.exists() {
            return Err(SourceError::Unavailable {
                resource: format!("{resource} ({})", path.display()),
            });
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| SourceError::payload(resource, e.to_string()))
    }
}

#[async_trait]
impl FantasyDataSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn league(&self, _ctx: &AdapterContext, _league_id: &str) -> Result<LeagueInfo, SourceError> {
        parse_league(self.read("league", "league.json")?)
    }

    async fn rosters(&self, _ctx: &AdapterContext, _league_id: &str) -> Result<Vec<RosterPayload>, SourceError> {
        parse_rosters(self.read("rosters", "rosters.json")?)
    }

    async fn matchups(&self, ctx: &AdapterContext, _league_id: &str) -> Result<Vec<MatchupPayload>, SourceError> {
        parse_matchups(self.read("matchups", &format!("matchups_week_{}.json", ctx.week))?)
    }

    async fn player_directory(&self, _ctx: &AdapterContext) -> Result<PlayerDirectory, SourceError> {
        parse_player_directory(self.read("players", "players.json")?)
    }

    async fn weekly_stats(&self, ctx: &AdapterContext) -> Result<WeeklyStats, SourceError> {
        parse_weekly_stats(self.read(
            "stats",
            &format!("stats_{}_{}.json", ctx.season_year, ctx.week),
        )?)
    }

    async fn drafts(&self, _ctx: &AdapterContext, _league_id: &str) -> Result<Vec<DraftSummary>, SourceError> {
        parse_drafts(self.read("drafts", "drafts.json")?)
    }

    async fn draft_picks(&self, _ctx: &AdapterContext, draft_id: &str) -> Result<Vec<DraftPickPayload>, SourceError> {
        parse_draft_picks(self.read("draft_picks", &format!("draft_picks_{draft_id}.json"))?)
    }

    async fn nfl_state(&self) -> Result<NflState, SourceError> {
        decode("state", self.read("state", "state.json")?)
    }
}
