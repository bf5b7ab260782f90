// Prompt construction for weekly recaps.
//
// All numbers are computed up front from the snapshot so the model only
// writes prose around them.

use std::fmt::Write as _;

use serde::Serialize;

use crate::snapshot::{GameResult, RecapSnapshot};

/// Previous recaps are quoted only up to this many characters each.
pub const PREVIOUS_RECAP_EXCERPT: usize = 600;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecapPrompt {
    pub system: String,
    pub context: String,
}

pub fn system_prompt() -> String {
    "You are the commissioner-voice columnist for a long-running fantasy football league.\n\
     \n\
     Write a weekly recap of roughly 400 words covering every matchup of the week.\n\
     Call out blowouts, close games, streaks, and any manager who left big points on the bench.\n\
     Use head-to-head history and all-time records for color, and keep running jokes from\n\
     earlier recaps alive where they fit.\n\
     \n\
     Use only the numbers provided. Do not invent scores, players, or records."
        .to_string()
}

fn excerpt(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

pub fn build_recap_prompt(snapshot: &RecapSnapshot) -> RecapPrompt {
    let target = snapshot.target;
    let mut out = String::with_capacity(4096);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# Season {} Week {} recap data\n", target.season_year, target.week);

    out.push_str("## MATCHUPS\n");
    if snapshot.matchups.is_empty() {
        out.push_str("No games recorded for this week.\n");
    }
    for m in &snapshot.matchups {
        let _ = writeln!(
            out,
            "- {} {:.2} vs {} {:.2} (margin {:.2}{}) | all-time H2H before this week: {} games, {}-{}-{}",
            m.manager1_name,
            m.manager1_score,
            m.manager2_name,
            m.manager2_score,
            m.margin,
            if m.is_playoff { ", playoff" } else { "" },
            m.head_to_head.games,
            m.head_to_head.manager1_wins,
            m.head_to_head.manager2_wins,
            m.head_to_head.ties,
        );
    }

    out.push_str("\n## STANDINGS\n");
    for row in &snapshot.standings {
        let _ = writeln!(
            out,
            "{}. {} {}-{}-{} | PF {:.2} | PA {:.2}",
            row.rank, row.manager_name, row.wins, row.losses, row.ties, row.points_for, row.points_against
        );
    }

    out.push_str("\n## STREAKS\n");
    for row in snapshot.streaks.iter().filter(|s| s.length >= 2) {
        let kind = match row.result {
            GameResult::Win => "winning",
            GameResult::Loss => "losing",
            GameResult::Tie => "tie",
        };
        let _ = writeln!(
            out,
            "- {}: {} {}-game {} streak (last five: {})",
            row.manager_name,
            row.result.letter(),
            row.length,
            kind,
            row.recent_form
        );
    }

    out.push_str("\n## LINEUPS\n");
    for lineup in &snapshot.lineups {
        let top = lineup
            .starters
            .iter()
            .take(3)
            .map(|p| format!("{} ({}) {:.2}", p.player_name, p.nfl_position, p.points))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "- {}: starters {:.2}, bench {:.2}. Top starters: {}",
            lineup.manager_name, lineup.starter_points, lineup.bench_points, top
        );
    }

    let mistakes: Vec<_> = snapshot.bench_mistakes().collect();
    if !mistakes.is_empty() {
        out.push_str("\n## BENCH MISTAKES\n");
        for m in mistakes {
            let _ = writeln!(
                out,
                "- {} benched {} ({} {:.2}) and started {} ({:.2}): {:.2} points left on the bench",
                m.manager_name,
                m.bench_player,
                m.position,
                m.bench_points,
                m.starter_player,
                m.starter_points,
                m.points_left_on_bench
            );
        }
    }

    out.push_str("\n## ALL-TIME RECORDS\n");
    for row in &snapshot.career {
        let _ = writeln!(
            out,
            "- {} {}-{}-{} over {} season(s), {:.2} total points",
            row.manager_name, row.wins, row.losses, row.ties, row.seasons, row.points_for
        );
    }

    if !snapshot.previous_recaps.is_empty() {
        out.push_str("\n## PREVIOUS RECAPS (newest first)\n");
        for recap in &snapshot.previous_recaps {
            let _ = writeln!(
                out,
                "### Season {} Week {}\n{}\n",
                recap.season_year,
                recap.week,
                excerpt(&recap.recap_text, PREVIOUS_RECAP_EXCERPT)
            );
        }
    }

    RecapPrompt {
        system: system_prompt(),
        context: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{build_snapshot, GameRow, RosterScoreRow};
    use chrono::Utc;
    use gridiron_core::{LineupSlot, Position, RecapRecord, WeekKey};

    fn game(week: i32, s1: f64, s2: f64) -> GameRow {
        GameRow {
            season_year: 2024,
            week,
            manager1_id: 1,
            manager1_name: "Alice".into(),
            manager2_id: 2,
            manager2_name: "Bob".into(),
            score1: s1,
            score2: s2,
            is_playoff: false,
        }
    }

    fn player(name: &str, starter: bool, points: f64) -> RosterScoreRow {
        RosterScoreRow {
            season_year: 2024,
            week: 3,
            manager_id: 1,
            manager_name: "Alice".into(),
            player_id: name.to_lowercase(),
            player_name: name.into(),
            nfl_position: Position::WR,
            lineup_slot: if starter { LineupSlot::Wr } else { LineupSlot::Bn },
            is_starter: starter,
            points,
        }
    }

    #[test]
    fn context_covers_each_section() {
        let games = vec![game(1, 100.0, 90.0), game(2, 110.0, 80.0), game(3, 95.5, 101.25)];
        let rosters = vec![player("Starter", true, 4.0), player("Benchwarmer", false, 22.0)];
        let recap = RecapRecord {
            season_year: 2024,
            week: 2,
            recap_text: "x".repeat(PREVIOUS_RECAP_EXCERPT + 50),
            generated_at: Utc::now(),
        };
        let snapshot = build_snapshot(WeekKey::new(2024, 3), &games, &rosters, vec![recap]);
        let prompt = build_recap_prompt(&snapshot);

        assert!(prompt.system.contains("Do not invent"));
        let context = &prompt.context;
        assert!(context.contains("# Season 2024 Week 3"));
        assert!(context.contains("- Alice 95.50 vs Bob 101.25 (margin 5.75) | all-time H2H before this week: 2 games, 2-0-0"));
        assert!(context.contains("1. Alice 2-1-0"));
        assert!(context.contains("Alice benched Benchwarmer (WR 22.00) and started Starter (4.00): 18.00"));
        assert!(context.contains("### Season 2024 Week 2"));
        let quoted = "x".repeat(PREVIOUS_RECAP_EXCERPT) + "...";
        assert!(context.contains(&quoted));
        assert!(!context.contains(&"x".repeat(PREVIOUS_RECAP_EXCERPT + 1)));
    }

    #[test]
    fn empty_week_still_builds() {
        let snapshot = build_snapshot(WeekKey::new(2024, 1), &[], &[], Vec::new());
        let prompt = build_recap_prompt(&snapshot);
        assert!(prompt.context.contains("No games recorded"));
        assert!(!prompt.context.contains("PREVIOUS RECAPS"));
    }
}
