//! Leaderboard and ranking functionality
//!
//! This module ranks the participants of a running game, ranks the all-time
//! registry, and folds a finished game into the registry. It also renders
//! the boards as chat text.

use itertools::Itertools;
use serde::Serialize;

use super::{
    TruncatedVec,
    constants::leaderboard::CURRENT_LIMIT,
    registry::PlayerRegistry,
    roster::{Id, Participant, Roster, Stats},
};

/// One ranked row of a game's standings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// Position on the board (1-indexed)
    pub position: usize,
    /// Player identity
    pub id: Id,
    /// Display name
    pub name: String,
    /// Session statistics
    pub stats: Stats,
}

/// One ranked row of the all-time board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllTimeStanding {
    /// Position on the board (1-indexed)
    pub position: usize,
    /// Player identity
    pub id: Id,
    /// Most recent display name
    pub name: String,
    /// Points over all games
    pub total_points: u64,
    /// Number of games played
    pub games_played: u64,
    /// Mean points per game
    pub average_points: f64,
}

/// Ranks the participants of a game
///
/// Ordering is by points, then speed bonuses, then correct answers, all
/// descending; remaining ties keep join order.
///
/// # Arguments
///
/// * `roster` - The game's participants
///
/// # Returns
///
/// Up to 50 standings along with the total participant count
pub fn current(roster: &Roster) -> TruncatedVec<Standing> {
    let ranked = roster
        .in_join_order()
        .into_iter()
        .sorted_by(|a, b| {
            let (a, b) = (a.stats(), b.stats());
            b.points
                .cmp(&a.points)
                .then(b.speed_bonus_count.cmp(&a.speed_bonus_count))
                .then(b.correct_count.cmp(&a.correct_count))
        })
        .enumerate()
        .map(|(i, participant)| Standing {
            position: i + 1,
            id: participant.id(),
            name: participant.name().to_owned(),
            stats: participant.stats(),
        });

    TruncatedVec::new(ranked, CURRENT_LIMIT, roster.len())
}

/// Ranks the all-time registry by total points, ties broken by
/// registration order
///
/// # Arguments
///
/// * `registry` - The all-time records
/// * `limit` - Maximum number of rows to keep
pub fn all_time(registry: &PlayerRegistry, limit: usize) -> TruncatedVec<AllTimeStanding> {
    let ranked = registry
        .entries()
        .sorted_by(|(_, a), (_, b)| {
            b.total_points
                .cmp(&a.total_points)
                .then(a.first_seen.cmp(&b.first_seen))
        })
        .enumerate()
        .map(|(i, (id, entry))| AllTimeStanding {
            position: i + 1,
            id,
            name: entry.name.clone(),
            total_points: entry.total_points,
            games_played: entry.games_played,
            average_points: entry.average_points(),
        });

    TruncatedVec::new(ranked, limit, registry.len())
}

/// Credits every participant's session points and one game played to the
/// registry
pub fn fold_into(roster: &Roster, registry: &mut PlayerRegistry) {
    for participant in roster.in_join_order() {
        registry.record_game(
            participant.id(),
            participant.name(),
            participant.stats().points,
        );
    }
}

fn medal(position: usize) -> String {
    match position {
        1 => "🥇".to_owned(),
        2 => "🥈".to_owned(),
        3 => "🥉".to_owned(),
        _ => format!("{position}."),
    }
}

/// Renders ranked game standings, one line per player
pub fn render_standings(standings: &TruncatedVec<Standing>) -> String {
    if standings.exact_count() == 0 {
        return "No players took part.".to_owned();
    }

    standings
        .items()
        .iter()
        .map(|s| {
            format!(
                "{} {}: {} pts ({} correct, {} fast)",
                medal(s.position),
                s.name,
                s.stats.points,
                s.stats.correct_count,
                s.stats.speed_bonus_count
            )
        })
        .join("\n")
}

/// Renders the standings of a running game
pub fn render_current(standings: &TruncatedVec<Standing>) -> String {
    format!(
        "📊 Current game standings:\n\n{}",
        render_standings(standings)
    )
}

/// Renders the all-time board
pub fn render_all_time(standings: &TruncatedVec<AllTimeStanding>) -> String {
    if standings.exact_count() == 0 {
        return "No games have been played yet!".to_owned();
    }

    let rows = standings
        .items()
        .iter()
        .map(|s| {
            format!(
                "{} {}: {} pts ({}, avg {:.1})",
                medal(s.position),
                s.name,
                s.total_points,
                pluralizer::pluralize("game", s.games_played as isize, true),
                s.average_points
            )
        })
        .join("\n");

    format!(
        "🏆 All-time leaderboard:\n\n{rows}\n\n👥 Total registered players: {}",
        standings.exact_count()
    )
}

/// Renders the roster of a game in join order
pub fn render_roster(participants: &[&Participant], progress: Option<(usize, usize)>) -> String {
    if participants.is_empty() {
        return "No players have joined yet.".to_owned();
    }

    let mut text = format!(
        "👥 {}:\n",
        pluralizer::pluralize("player", participants.len() as isize, true)
    );
    text.push_str(
        &participants
            .iter()
            .map(|p| format!("• {} ({} pts)", p.name(), p.stats().points))
            .join("\n"),
    );
    if let Some((index, count)) = progress {
        text.push_str(&format!("\n\n❓ Question {}/{count}", index + 1));
    }
    text
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::roster::Actor;

    fn roster(entries: &[(i64, &str, &[(u64, u64)])]) -> Roster {
        let mut roster = Roster::default();
        for (id, name, credits) in entries {
            roster.join(&Actor::new(*id, *name), 0);
            let participant = roster.get_mut(Id::new(*id)).unwrap();
            for (points, bonus) in *credits {
                participant.credit(*points, *bonus);
            }
        }
        roster
    }

    fn names(standings: &TruncatedVec<Standing>) -> Vec<&str> {
        standings.items().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_current_orders_by_points() {
        let roster = roster(&[
            (1, "low", &[(1, 0)]),
            (2, "high", &[(4, 3), (4, 3)]),
            (3, "mid", &[(3, 2)]),
        ]);
        let standings = current(&roster);
        assert_eq!(names(&standings), ["high", "mid", "low"]);
        assert_eq!(standings.items()[0].position, 1);
        assert_eq!(standings.exact_count(), 3);
    }

    #[test]
    fn test_current_tie_breaks() {
        // equal points: more speed bonuses first, then more correct answers,
        // then join order
        let roster = roster(&[
            (1, "slow", &[(1, 0), (1, 0), (1, 0), (1, 0)]),
            (2, "fast", &[(4, 3)]),
            (3, "twin_a", &[(2, 1), (2, 1)]),
            (4, "twin_b", &[(2, 1), (2, 1)]),
            (5, "fewer", &[(3, 2), (1, 0)]),
        ]);
        let standings = current(&roster);
        assert_eq!(
            names(&standings),
            ["twin_a", "twin_b", "fewer", "fast", "slow"]
        );
    }

    #[test]
    fn test_all_time_orders_and_truncates() {
        let mut registry = PlayerRegistry::default();
        registry.record_game(Id::new(1), "a", 5);
        registry.record_game(Id::new(2), "b", 9);
        registry.record_game(Id::new(3), "c", 5);

        let board = all_time(&registry, 2);
        assert_eq!(board.exact_count(), 3);
        let rows = board.items().iter().map(|s| s.name.as_str()).collect_vec();
        assert_eq!(rows, ["b", "a"]);
    }

    #[test]
    fn test_fold_into_credits_every_participant() {
        let roster = roster(&[(1, "scorer", &[(4, 3)]), (2, "blank", &[])]);
        let mut registry = PlayerRegistry::default();
        fold_into(&roster, &mut registry);

        assert_eq!(registry.get(Id::new(1)).unwrap().total_points, 4);
        assert_eq!(registry.get(Id::new(2)).unwrap().total_points, 0);
        assert_eq!(registry.get(Id::new(2)).unwrap().games_played, 1);
    }

    #[test]
    fn test_render_empty_boards() {
        assert_eq!(
            render_all_time(&all_time(&PlayerRegistry::default(), 10)),
            "No games have been played yet!"
        );
        assert_eq!(
            render_standings(&current(&Roster::default())),
            "No players took part."
        );
        assert_eq!(render_roster(&[], None), "No players have joined yet.");
    }

    #[test]
    fn test_render_all_time() {
        let mut registry = PlayerRegistry::default();
        registry.record_game(Id::new(1), "ada", 6);
        registry.record_game(Id::new(1), "ada", 3);

        let text = render_all_time(&all_time(&registry, 10));
        assert!(text.contains("🥇 ada: 9 pts (2 games, avg 4.5)"));
        assert!(text.contains("Total registered players: 1"));
    }

    #[test]
    fn test_render_roster_with_progress() {
        let roster = roster(&[(1, "ada", &[(2, 1)])]);
        let text = render_roster(&roster.in_join_order(), Some((2, 10)));
        assert!(text.contains("1 player:"));
        assert!(text.contains("• ada (2 pts)"));
        assert!(text.contains("Question 3/10"));
    }
}
