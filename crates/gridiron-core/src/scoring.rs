//! Fantasy point calculation from raw per-week stat maps.

use std::collections::BTreeMap;

use crate::{Position, ScoringMode};

/// Raw statistics keyed by provider stat name (`pass_yd`, `rec`, ...).
pub type StatMap = BTreeMap<String, f64>;

const OFFENSE_WEIGHTS: &[(&str, f64)] = &[
    ("pass_yd", 0.04),
    ("pass_td", 4.0),
    ("pass_int", -2.0),
    ("pass_2pt", 2.0),
    ("rush_yd", 0.1),
    ("rush_td", 6.0),
    ("rush_2pt", 2.0),
    ("rec_yd", 0.1),
    ("rec_td", 6.0),
    ("rec_2pt", 2.0),
    ("fum_lost", -2.0),
];

// `fgm_40_49` and `fgm_50p` are bonuses on top of the base `fgm` weight.
const SPECIAL_TEAMS_WEIGHTS: &[(&str, f64)] = &[
    ("fgm", 3.0),
    ("fgm_40_49", 1.0),
    ("fgm_50p", 2.0),
    ("xpm", 1.0),
    ("fgmiss", -1.0),
    ("def_td", 6.0),
    ("sack", 1.0),
    ("int", 2.0),
    ("fum_rec", 2.0),
    ("safe", 2.0),
    ("blk_kick", 2.0),
];

fn stat(stats: &StatMap, key: &str) -> f64 {
    stats.get(key).copied().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn weighted_sum(stats: &StatMap, weights: &[(&str, f64)]) -> f64 {
    weights
        .iter()
        .map(|(key, weight)| stat(stats, key) * weight)
        .sum()
}

fn offense_points(stats: &StatMap, mode: ScoringMode) -> f64 {
    weighted_sum(stats, OFFENSE_WEIGHTS) + stat(stats, "rec") * mode.reception_weight()
}

/// Round to two decimal places.
pub fn round_points(points: f64) -> f64 {
    (points * 100.0).round() / 100.0
}

/// Offensive scoring only.
pub fn calculate_fantasy_points(stats: &StatMap, mode: ScoringMode) -> f64 {
    round_points(offense_points(stats, mode))
}

/// Offensive scoring plus kicker and team-defense weights.
pub fn calculate_fantasy_points_with_special_teams(stats: &StatMap, mode: ScoringMode) -> f64 {
    round_points(offense_points(stats, mode) + weighted_sum(stats, SPECIAL_TEAMS_WEIGHTS))
}

/// Kickers and defenses score with the special-teams table; everyone else
/// (including players whose position is unknown) with offense only.
pub fn points_for_position(stats: &StatMap, mode: ScoringMode, position: Option<Position>) -> f64 {
    match position {
        Some(p) if p.is_special_teams() => calculate_fantasy_points_with_special_teams(stats, mode),
        _ => calculate_fantasy_points(stats, mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pairs: &[(&str, f64)]) -> StatMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn half_ppr_reference_line() {
        let line = stats(&[("pass_yd", 250.0), ("pass_td", 2.0), ("pass_int", 1.0), ("rec", 0.0)]);
        assert_eq!(calculate_fantasy_points(&line, ScoringMode::HalfPpr), 16.0);
    }

    #[test]
    fn reception_weight_varies_by_mode() {
        let line = stats(&[("rec", 6.0), ("rec_yd", 71.0), ("rec_td", 1.0)]);
        assert_eq!(calculate_fantasy_points(&line, ScoringMode::Standard), 13.1);
        assert_eq!(calculate_fantasy_points(&line, ScoringMode::HalfPpr), 16.1);
        assert_eq!(calculate_fantasy_points(&line, ScoringMode::Ppr), 19.1);
    }

    #[test]
    fn rounding_keeps_two_decimal_scale() {
        // 37 rushing yards and 1 lost fumble: 3.7 - 2 = 1.7, never 17000.
        let line = stats(&[("rush_yd", 37.0), ("fum_lost", 1.0)]);
        let points = calculate_fantasy_points(&line, ScoringMode::Ppr);
        assert_eq!(points, 1.7);
        assert!(points < 100.0);
        assert_eq!(round_points(12.345_678), 12.35);
        assert_eq!(round_points(-0.004), -0.0);
    }

    #[test]
    fn special_teams_variant_adds_kicker_and_defense_weights() {
        let kicker = stats(&[("fgm", 3.0), ("fgm_40_49", 1.0), ("fgm_50p", 1.0), ("xpm", 2.0), ("fgmiss", 1.0)]);
        assert_eq!(calculate_fantasy_points(&kicker, ScoringMode::HalfPpr), 0.0);
        assert_eq!(
            calculate_fantasy_points_with_special_teams(&kicker, ScoringMode::HalfPpr),
            9.0 + 1.0 + 2.0 + 2.0 - 1.0
        );

        let defense = stats(&[("sack", 4.0), ("int", 2.0), ("fum_rec", 1.0), ("def_td", 1.0), ("safe", 1.0), ("blk_kick", 1.0)]);
        assert_eq!(
            points_for_position(&defense, ScoringMode::Standard, Some(Position::DEF)),
            4.0 + 4.0 + 2.0 + 6.0 + 2.0 + 2.0
        );
        assert_eq!(points_for_position(&defense, ScoringMode::Standard, Some(Position::WR)), 0.0);
    }

    #[test]
    fn absent_and_non_finite_stats_count_as_zero() {
        let line = stats(&[("pass_yd", f64::NAN), ("rush_td", 1.0)]);
        assert_eq!(calculate_fantasy_points(&line, ScoringMode::Standard), 6.0);
        assert_eq!(calculate_fantasy_points(&StatMap::new(), ScoringMode::Ppr), 0.0);
    }
}
