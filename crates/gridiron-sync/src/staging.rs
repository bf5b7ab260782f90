//! Staging rows: what ingestion writes, what promotion reads back, and the
//! decoding that sits between the two.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use gridiron_adapters::PlayerDirectory;
use gridiron_core::{LineupSlot, Position, StatMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Directory resolution for one player id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlayer {
    pub position: Option<String>,
    pub name: String,
    pub team: Option<String>,
}

/// Directory hit first; otherwise short all-caps ids are team defenses
/// (`SF`, `KC`, `PHI`); anything else is kept with an unknown position.
pub fn resolve_player(player_id: &str, directory: &PlayerDirectory) -> ResolvedPlayer {
    if let Some(info) = directory.get(player_id) {
        let position = info.position.clone().filter(|p| !p.trim().is_empty());
        let name = info
            .display_name()
            .unwrap_or_else(|| unknown_player_name(player_id));
        return ResolvedPlayer {
            position,
            name,
            team: info.team.clone(),
        };
    }
    if looks_like_team_defense(player_id) {
        return ResolvedPlayer {
            position: Some(Position::DEF.as_str().to_string()),
            name: player_id.to_string(),
            team: Some(player_id.to_string()),
        };
    }
    ResolvedPlayer {
        position: None,
        name: unknown_player_name(player_id),
        team: None,
    }
}

pub fn looks_like_team_defense(player_id: &str) -> bool {
    !player_id.is_empty()
        && player_id.chars().count() <= 3
        && player_id.chars().all(|c| c.is_ascii_uppercase())
}

pub fn unknown_player_name(player_id: &str) -> String {
    format!("Unknown ({player_id})")
}

/// The lookup object ingestion writes: positions and names keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerLookupPayload {
    pub positions: BTreeMap<String, Option<String>>,
    pub names: BTreeMap<String, String>,
}

impl PlayerLookupPayload {
    pub fn build<'a>(player_ids: impl IntoIterator<Item = &'a String>, directory: &PlayerDirectory) -> Self {
        let mut lookup = Self::default();
        for player_id in player_ids {
            let resolved = resolve_player(player_id, directory);
            lookup.positions.insert(player_id.clone(), resolved.position);
            lookup.names.insert(player_id.clone(), resolved.name);
        }
        lookup
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingRosterRow {
    pub league_id: String,
    pub roster_id: i32,
    pub season_year: i32,
    pub week: i32,
    pub owner_id: Option<String>,
    pub starters: Vec<String>,
    pub players: Vec<String>,
    pub player_lookup: PlayerLookupPayload,
    pub roster_positions: Vec<String>,
    pub playoff_week_start: Option<i32>,
    pub raw_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingPlayerStatRow {
    pub player_id: String,
    pub season_year: i32,
    pub week: i32,
    pub player_name: String,
    pub position: Option<String>,
    pub nfl_team: Option<String>,
    pub fantasy_points: f64,
    pub stats: StatMap,
    pub raw_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingMatchupRow {
    pub league_id: String,
    pub roster_id: i32,
    pub season_year: i32,
    pub week: i32,
    pub matchup_id: Option<i32>,
    pub points: f64,
    pub playoff_week_start: Option<i32>,
    pub raw_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingDraftPickRow {
    pub league_id: String,
    pub draft_id: String,
    pub season_year: i32,
    pub round: i32,
    pub pick_no: i32,
    pub roster_id: Option<i32>,
    pub player_id: String,
    pub player_name: String,
    pub position: Option<String>,
    pub raw_data: JsonValue,
}

/// A staging roster as read back for promotion. The list and lookup
/// columns are left as JSON: older imports stored them as encoded strings.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStagingRoster {
    pub id: i64,
    pub league_id: String,
    pub roster_id: i32,
    pub season_year: i32,
    pub week: i32,
    pub starters: JsonValue,
    pub players: JsonValue,
    pub player_lookup: JsonValue,
    pub roster_positions: JsonValue,
    pub playoff_week_start: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStagingPlayerStat {
    pub id: i64,
    pub player_id: String,
    pub season_year: i32,
    pub week: i32,
    pub player_name: String,
    pub position: Option<String>,
    pub nfl_team: Option<String>,
    pub fantasy_points: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStagingMatchup {
    pub id: i64,
    pub roster_id: i32,
    pub season_year: i32,
    pub week: i32,
    pub matchup_id: Option<i32>,
    pub points: f64,
    pub playoff_week_start: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStagingDraftPick {
    pub id: i64,
    pub league_id: String,
    pub draft_id: String,
    pub season_year: i32,
    pub round: i32,
    pub pick_no: i32,
    pub roster_id: Option<i32>,
    pub player_id: String,
    pub player_name: String,
    pub position: Option<String>,
}

/// A staging field that is either the structure itself or that structure
/// serialized into a JSON string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Staged<T> {
    Structured(T),
    Encoded(String),
}

impl<T: DeserializeOwned> Staged<T> {
    pub fn into_inner(self) -> Result<T> {
        match self {
            Staged::Structured(value) => Ok(value),
            Staged::Encoded(text) => {
                serde_json::from_str(&text).context("decoding string-encoded staging field")
            }
        }
    }

    pub fn decode(value: JsonValue) -> Result<T> {
        let staged: Staged<T> =
            serde_json::from_value(value).context("staging field is neither structured nor a string")?;
        staged.into_inner()
    }
}

impl<T: DeserializeOwned + Default> Staged<T> {
    /// `null` decodes to the empty value.
    pub fn decode_or_default(value: JsonValue) -> Result<T> {
        match value {
            JsonValue::Null => Ok(T::default()),
            JsonValue::String(text) if text.trim().is_empty() || text.trim() == "null" => Ok(T::default()),
            other => Self::decode(other),
        }
    }
}

/// The per-roster lookup in either of its stored shapes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PlayerLookup {
    Tagged {
        positions: BTreeMap<String, Option<String>>,
        #[serde(default)]
        names: BTreeMap<String, Option<String>>,
    },
    /// Legacy imports stored the positions map alone.
    Untagged(BTreeMap<String, Option<String>>),
}

impl Default for PlayerLookup {
    fn default() -> Self {
        PlayerLookup::Untagged(BTreeMap::new())
    }
}

impl PlayerLookup {
    fn positions(&self) -> &BTreeMap<String, Option<String>> {
        match self {
            PlayerLookup::Tagged { positions, .. } => positions,
            PlayerLookup::Untagged(positions) => positions,
        }
    }

    pub fn position(&self, player_id: &str) -> Option<&str> {
        self.positions()
            .get(player_id)
            .and_then(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn name(&self, player_id: &str) -> Option<&str> {
        match self {
            PlayerLookup::Tagged { names, .. } => names
                .get(player_id)
                .and_then(|n| n.as_deref())
                .filter(|n| !n.trim().is_empty()),
            PlayerLookup::Untagged(_) => None,
        }
    }
}

/// A staging roster with every field decoded into its typed form.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRoster {
    pub staging_id: i64,
    pub roster_id: i32,
    pub season_year: i32,
    pub week: i32,
    pub starters: Vec<String>,
    pub players: Vec<String>,
    pub lookup: PlayerLookup,
    pub template: Vec<String>,
    pub playoff_week_start: Option<i32>,
}

impl DecodedRoster {
    pub fn decode(stored: StoredStagingRoster) -> Result<Self> {
        let id = stored.id;
        Ok(Self {
            staging_id: id,
            roster_id: stored.roster_id,
            season_year: stored.season_year,
            week: stored.week,
            starters: Staged::<Vec<String>>::decode_or_default(stored.starters)
                .with_context(|| format!("staging roster {id}: starters"))?,
            players: Staged::<Vec<String>>::decode_or_default(stored.players)
                .with_context(|| format!("staging roster {id}: players"))?,
            lookup: Staged::<PlayerLookup>::decode_or_default(stored.player_lookup)
                .with_context(|| format!("staging roster {id}: player_lookup"))?,
            template: Staged::<Vec<String>>::decode_or_default(stored.roster_positions)
                .with_context(|| format!("staging roster {id}: roster_positions"))?,
            playoff_week_start: stored.playoff_week_start,
        })
    }

    /// Starters keep their template index even when an empty slot (`"0"`)
    /// precedes them; bench is every rostered player not starting.
    pub fn lineup(&self) -> Vec<(String, LineupSlot, bool)> {
        let mut seen = std::collections::HashSet::new();
        let mut lineup = Vec::new();
        for (index, player_id) in self.starters.iter().enumerate() {
            if is_empty_slot(player_id) || !seen.insert(player_id.clone()) {
                continue;
            }
            lineup.push((player_id.clone(), LineupSlot::for_starter(&self.template, index), true));
        }
        for player_id in &self.players {
            if is_empty_slot(player_id) || !seen.insert(player_id.clone()) {
                continue;
            }
            lineup.push((player_id.clone(), LineupSlot::Bn, false));
        }
        lineup
    }
}

pub fn is_empty_slot(player_id: &str) -> bool {
    let trimmed = player_id.trim();
    trimmed.is_empty() || trimmed == "0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridiron_core::PlayerInfo;
    use serde_json::json;

    fn directory() -> PlayerDirectory {
        let mut directory = PlayerDirectory::new();
        directory.insert(
            "4046".into(),
            PlayerInfo {
                player_id: "4046".into(),
                full_name: Some("Patrick Mahomes".into()),
                position: Some("QB".into()),
                team: Some("KC".into()),
                ..Default::default()
            },
        );
        directory.insert(
            "1264".into(),
            PlayerInfo {
                player_id: "1264".into(),
                first_name: Some("Justin".into()),
                last_name: Some("Tucker".into()),
                position: Some("K".into()),
                ..Default::default()
            },
        );
        directory
    }

    #[test]
    fn resolves_directory_hits_and_name_fallback() {
        let directory = directory();
        let qb = resolve_player("4046", &directory);
        assert_eq!(qb.position.as_deref(), Some("QB"));
        assert_eq!(qb.name, "Patrick Mahomes");
        assert_eq!(resolve_player("1264", &directory).name, "Justin Tucker");
    }

    #[test]
    fn short_uppercase_ids_are_team_defenses() {
        let directory = directory();
        for id in ["SF", "KC", "PHI"] {
            let resolved = resolve_player(id, &directory);
            assert_eq!(resolved.position.as_deref(), Some("DEF"));
            assert_eq!(resolved.name, id);
        }
        assert!(!looks_like_team_defense("DAL1"));
        assert!(!looks_like_team_defense("Kc"));
        assert!(!looks_like_team_defense("ABCD"));
    }

    #[test]
    fn unknown_players_are_retained_without_position() {
        let resolved = resolve_player("99999", &directory());
        assert_eq!(resolved.position, None);
        assert_eq!(resolved.name, "Unknown (99999)");
    }

    #[test]
    fn staged_fields_decode_from_either_shape() {
        let structured: Vec<String> = Staged::decode(json!(["4046", "SF"])).unwrap();
        let encoded: Vec<String> = Staged::decode(json!("[\"4046\",\"SF\"]")).unwrap();
        assert_eq!(structured, encoded);
        assert_eq!(Staged::<Vec<String>>::decode_or_default(JsonValue::Null).unwrap(), Vec::<String>::new());
        assert!(Staged::<Vec<String>>::decode(json!("not json")).is_err());
    }

    #[test]
    fn lookup_decodes_tagged_and_legacy_shapes() {
        let tagged: PlayerLookup = Staged::decode(json!({
            "positions": {"4046": "QB", "99999": null},
            "names": {"4046": "Patrick Mahomes"}
        }))
        .unwrap();
        assert_eq!(tagged.position("4046"), Some("QB"));
        assert_eq!(tagged.position("99999"), None);
        assert_eq!(tagged.name("4046"), Some("Patrick Mahomes"));

        let legacy: PlayerLookup = Staged::decode(json!("{\"4046\":\"QB\",\"SF\":\"DEF\"}")).unwrap();
        assert!(matches!(legacy, PlayerLookup::Untagged(_)));
        assert_eq!(legacy.position("SF"), Some("DEF"));
        assert_eq!(legacy.name("SF"), None);
    }

    #[test]
    fn lineup_assigns_slots_and_skips_empty_starters() {
        let roster = DecodedRoster::decode(StoredStagingRoster {
            id: 1,
            league_id: "L".into(),
            roster_id: 4,
            season_year: 2024,
            week: 5,
            starters: json!(["4046", "0", "6813", "5850"]),
            players: json!(["4046", "6813", "5850", "9488"]),
            player_lookup: json!({"positions": {}, "names": {}}),
            roster_positions: json!("[\"QB\",\"RB\",\"RB\",\"SUPER_FLEX\"]"),
            playoff_week_start: Some(15),
        })
        .unwrap();

        let lineup = roster.lineup();
        assert_eq!(
            lineup,
            vec![
                ("4046".to_string(), LineupSlot::Qb, true),
                ("6813".to_string(), LineupSlot::Rb, true),
                ("5850".to_string(), LineupSlot::Flex, true),
                ("9488".to_string(), LineupSlot::Bn, false),
            ]
        );
    }
}
