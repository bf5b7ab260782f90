//! Core domain model for the league warehouse: positions, lineup slots,
//! scoring modes and the canonical production row shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod scoring;

pub use scoring::{
    calculate_fantasy_points, calculate_fantasy_points_with_special_teams, points_for_position,
    round_points, StatMap,
};

/// Provider-specific lineup labels that all collapse to [`LineupSlot::Flex`].
pub const FLEX_ALIASES: [&str; 3] = ["WRRB_FLEX", "REC_FLEX", "SUPER_FLEX"];

/// Real-world NFL positions accepted into production tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    QB,
    RB,
    WR,
    TE,
    K,
    DEF,
}

impl Position {
    pub const ALL: [Position; 6] = [
        Position::QB,
        Position::RB,
        Position::WR,
        Position::TE,
        Position::K,
        Position::DEF,
    ];

    /// Parse a directory/staging position label. Anything outside the
    /// production set (IDP positions, `OL`, empty strings) yields `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "QB" => Some(Position::QB),
            "RB" => Some(Position::RB),
            "WR" => Some(Position::WR),
            "TE" => Some(Position::TE),
            "K" => Some(Position::K),
            "DEF" => Some(Position::DEF),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::QB => "QB",
            Position::RB => "RB",
            Position::WR => "WR",
            Position::TE => "TE",
            Position::K => "K",
            Position::DEF => "DEF",
        }
    }

    pub fn is_special_teams(&self) -> bool {
        matches!(self, Position::K | Position::DEF)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fantasy lineup slot, as opposed to the player's NFL position. Ordered
/// the way a lineup card lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LineupSlot {
    #[serde(rename = "QB")]
    Qb,
    #[serde(rename = "RB")]
    Rb,
    #[serde(rename = "WR")]
    Wr,
    #[serde(rename = "TE")]
    Te,
    #[serde(rename = "FLEX")]
    Flex,
    #[serde(rename = "K")]
    K,
    #[serde(rename = "DEF")]
    Def,
    #[serde(rename = "BN")]
    Bn,
}

impl LineupSlot {
    /// Map a league template label onto a slot. Flex aliases normalize to
    /// `FLEX`; unrecognised labels yield `None`.
    pub fn from_template_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_uppercase();
        if FLEX_ALIASES.contains(&label.as_str()) {
            return Some(LineupSlot::Flex);
        }
        match label.as_str() {
            "QB" => Some(LineupSlot::Qb),
            "RB" => Some(LineupSlot::Rb),
            "WR" => Some(LineupSlot::Wr),
            "TE" => Some(LineupSlot::Te),
            "FLEX" => Some(LineupSlot::Flex),
            "K" => Some(LineupSlot::K),
            "DEF" => Some(LineupSlot::Def),
            "BN" => Some(LineupSlot::Bn),
            _ => None,
        }
    }

    /// Slot for the starter at `index`, matched positionally against the
    /// league template. Missing or non-starting template entries fall back
    /// to `FLEX`.
    pub fn for_starter<S: AsRef<str>>(template: &[S], index: usize) -> Self {
        match template
            .get(index)
            .and_then(|label| Self::from_template_label(label.as_ref()))
        {
            Some(LineupSlot::Bn) | None => LineupSlot::Flex,
            Some(slot) => slot,
        }
    }

    /// Template labels that describe a starting slot. Bench, injured
    /// reserve and taxi squads are not part of the starting template.
    pub fn is_starting_label(label: &str) -> bool {
        !matches!(
            label.trim().to_ascii_uppercase().as_str(),
            "BN" | "IR" | "TAXI" | ""
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineupSlot::Qb => "QB",
            LineupSlot::Rb => "RB",
            LineupSlot::Wr => "WR",
            LineupSlot::Te => "TE",
            LineupSlot::Flex => "FLEX",
            LineupSlot::K => "K",
            LineupSlot::Def => "DEF",
            LineupSlot::Bn => "BN",
        }
    }
}

impl fmt::Display for LineupSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Standard,
    #[default]
    HalfPpr,
    Ppr,
}

impl ScoringMode {
    pub fn reception_weight(&self) -> f64 {
        match self {
            ScoringMode::Standard => 0.0,
            ScoringMode::HalfPpr => 0.5,
            ScoringMode::Ppr => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::Standard => "standard",
            ScoringMode::HalfPpr => "half_ppr",
            ScoringMode::Ppr => "ppr",
        }
    }
}

impl FromStr for ScoringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "std" => Ok(ScoringMode::Standard),
            "half_ppr" | "half-ppr" | "half" => Ok(ScoringMode::HalfPpr),
            "ppr" => Ok(ScoringMode::Ppr),
            other => Err(format!("unknown scoring mode `{other}`")),
        }
    }
}

/// A (season, week) point in league history. Ordering is chronological,
/// which is what every "as of" predicate compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekKey {
    pub season_year: i32,
    pub week: i32,
}

impl WeekKey {
    pub fn new(season_year: i32, week: i32) -> Self {
        Self { season_year, week }
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} week {}", self.season_year, self.week)
    }
}

/// One entry from the external player directory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

impl PlayerInfo {
    /// Full name, falling back to "first last" when the directory omits it.
    pub fn display_name(&self) -> Option<String> {
        if let Some(full) = self.full_name.as_deref().map(str::trim) {
            if !full.is_empty() {
                return Some(full.to_string());
            }
        }
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

/// Internal identity a season-scoped external roster id resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub team_id: i32,
    pub manager_id: i32,
}

/// Production table a roster entry lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterTable {
    WeeklyRoster,
    PlayoffRoster,
}

impl RosterTable {
    pub fn for_week(week: i32, playoff_week_start: Option<i32>) -> Self {
        match playoff_week_start {
            Some(start) if start > 0 && week >= start => RosterTable::PlayoffRoster,
            _ => RosterTable::WeeklyRoster,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            RosterTable::WeeklyRoster => "weekly_roster",
            RosterTable::PlayoffRoster => "playoff_roster",
        }
    }
}

/// Production roster row, unique on (season, week, team, player).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub season_year: i32,
    pub week: i32,
    pub team_id: i32,
    pub manager_id: i32,
    pub player_id: String,
    pub player_name: String,
    pub nfl_position: Position,
    pub lineup_slot: LineupSlot,
    pub is_starter: bool,
}

/// Production per-week player score, unique on (season, week, player).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatRecord {
    pub season_year: i32,
    pub week: i32,
    pub player_id: String,
    pub player_name: String,
    pub position: Position,
    pub nfl_team: Option<String>,
    pub fantasy_points: f64,
}

/// Production head-to-head result. `team1_id` is the lower external roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupRecord {
    pub season_year: i32,
    pub week: i32,
    pub team1_id: i32,
    pub team2_id: i32,
    pub team1_score: f64,
    pub team2_score: f64,
    pub is_playoff: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickRecord {
    pub season_year: i32,
    pub round: i32,
    pub pick_no: i32,
    pub team_id: i32,
    pub manager_id: i32,
    pub player_id: String,
    pub player_name: String,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecapRecord {
    pub season_year: i32,
    pub week: i32,
    pub recap_text: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_aliases_normalize_to_flex() {
        for alias in FLEX_ALIASES {
            assert_eq!(LineupSlot::from_template_label(alias), Some(LineupSlot::Flex));
            assert_eq!(LineupSlot::for_starter(&[alias], 0), LineupSlot::Flex);
        }
    }

    #[test]
    fn starter_beyond_template_defaults_to_flex() {
        let template = ["QB", "RB", "RB", "WR", "WR", "TE", "FLEX", "K", "DEF"];
        assert_eq!(LineupSlot::for_starter(&template, 0), LineupSlot::Qb);
        assert_eq!(LineupSlot::for_starter(&template, 8), LineupSlot::Def);
        assert_eq!(LineupSlot::for_starter(&template, 9), LineupSlot::Flex);
        assert_eq!(LineupSlot::for_starter::<&str>(&[], 0), LineupSlot::Flex);
    }

    #[test]
    fn unknown_or_bench_template_labels_fall_back_to_flex() {
        assert_eq!(LineupSlot::for_starter(&["IDP_FLEX"], 0), LineupSlot::Flex);
        assert_eq!(LineupSlot::for_starter(&["BN"], 0), LineupSlot::Flex);
        assert!(!LineupSlot::is_starting_label("BN"));
        assert!(!LineupSlot::is_starting_label("taxi"));
        assert!(LineupSlot::is_starting_label("SUPER_FLEX"));
    }

    #[test]
    fn position_parse_rejects_values_outside_production_set() {
        assert_eq!(Position::parse("wr"), Some(Position::WR));
        assert_eq!(Position::parse("DEF"), Some(Position::DEF));
        assert_eq!(Position::parse("LB"), None);
        assert_eq!(Position::parse(""), None);
    }

    #[test]
    fn week_keys_order_chronologically() {
        assert!(WeekKey::new(2023, 17) < WeekKey::new(2024, 1));
        assert!(WeekKey::new(2024, 5) < WeekKey::new(2024, 6));
    }

    #[test]
    fn display_name_falls_back_to_first_last() {
        let info = PlayerInfo {
            player_id: "4046".into(),
            full_name: None,
            first_name: Some("Patrick".into()),
            last_name: Some("Mahomes".into()),
            ..Default::default()
        };
        assert_eq!(info.display_name().as_deref(), Some("Patrick Mahomes"));
        assert_eq!(PlayerInfo::default().display_name(), None);
    }

    #[test]
    fn playoff_weeks_route_to_playoff_roster() {
        assert_eq!(RosterTable::for_week(14, Some(15)), RosterTable::WeeklyRoster);
        assert_eq!(RosterTable::for_week(15, Some(15)), RosterTable::PlayoffRoster);
        assert_eq!(RosterTable::for_week(17, None), RosterTable::WeeklyRoster);
    }

    #[test]
    fn scoring_mode_parses_and_serializes_snake_case() {
        assert_eq!("half_ppr".parse::<ScoringMode>(), Ok(ScoringMode::HalfPpr));
        assert_eq!(
            serde_json::to_string(&ScoringMode::HalfPpr).unwrap(),
            "\"half_ppr\""
        );
        assert!("dynasty".parse::<ScoringMode>().is_err());
    }
}
