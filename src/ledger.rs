//! Score bookkeeping
//!
//! The ledger holds every player's cumulative score for the lifetime of a
//! session together with the points handed out in each round. Applying a
//! closed round never mutates the ledger in place: it yields the next ledger,
//! so the same round applied to the same ledger always gives the same result.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::Serialize;

use super::{TruncatedVec, registry::Id, round::Round};

/// Points awarded for a correct answer
const POINTS_PER_CORRECT_ANSWER: u64 = 1;

/// Number of entries included in a standings broadcast
const STANDINGS_LIMIT: usize = 50;

/// A player's total and where it places them
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Total points earned so far
    pub points: u64,
    /// Position in the standings, 0-based
    pub position: usize,
}

/// Session-wide view of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// The top of the standings
    pub standings: TruncatedVec<(Id, u64)>,
    /// For each applied round, (players who earned points, players who didn't)
    pub rounds: Vec<(usize, usize)>,
}

/// Cumulative per-player scores plus the points earned in each round
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreLedger {
    /// Running total per player
    totals: BTreeMap<Id, u64>,
    /// For each applied round, the points each answering player earned
    points_earned: Vec<Vec<(Id, u64)>>,
}

impl ScoreLedger {
    /// Starts a player at zero, leaving an existing total untouched
    pub fn enroll(&mut self, id: Id) {
        self.totals.entry(id).or_insert(0);
    }

    /// Computes the ledger that results from a closed round
    ///
    /// Every player with an entry in the round's answers earns one point for
    /// the correct option and nothing otherwise. Players who have since left
    /// keep what they earned.
    pub fn apply_round_result(&self, round: &Round) -> ScoreLedger {
        let earned = round
            .answers()
            .keys()
            .sorted()
            .map(|id| {
                let points = if round.is_correct(*id) {
                    POINTS_PER_CORRECT_ANSWER
                } else {
                    0
                };
                (*id, points)
            })
            .collect_vec();

        let mut next = self.clone();
        for (id, points) in &earned {
            *next.totals.entry(*id).or_default() += points;
        }
        next.points_earned.push(earned);

        next
    }

    /// Total for one player
    pub fn points(&self, id: Id) -> Option<u64> {
        self.totals.get(&id).copied()
    }

    /// Every player's total
    pub fn scores(&self) -> &BTreeMap<Id, u64> {
        &self.totals
    }

    /// Totals sorted from highest to lowest, ties broken by id
    pub fn scores_descending(&self) -> Vec<(Id, u64)> {
        self.totals
            .iter()
            .map(|(id, points)| (*id, *points))
            .sorted_by(|(a_id, a), (b_id, b)| b.cmp(a).then(a_id.cmp(b_id)))
            .collect_vec()
    }

    /// The top of the standings, suitable for a broadcast
    pub fn standings(&self) -> TruncatedVec<(Id, u64)> {
        let descending = self.scores_descending();
        let count = descending.len();
        TruncatedVec::new(descending.into_iter(), STANDINGS_LIMIT, count)
    }

    /// A player's total and standing
    pub fn score(&self, id: Id) -> Option<ScoreMessage> {
        self.scores_descending()
            .iter()
            .position(|(other, _)| *other == id)
            .map(|position| ScoreMessage {
                points: self.totals.get(&id).copied().unwrap_or_default(),
                position,
            })
    }

    /// Standings and per-round statistics
    pub fn summary(&self) -> Summary {
        Summary {
            standings: self.standings(),
            rounds: self.round_stats(),
        }
    }

    /// Number of rounds applied so far
    pub fn round_count(&self) -> usize {
        self.points_earned.len()
    }

    /// Points a player earned in each applied round, zero where absent
    pub fn player_summary(&self, id: Id) -> Vec<u64> {
        self.points_earned
            .iter()
            .map(|round| {
                round
                    .iter()
                    .find(|(other, _)| *other == id)
                    .map_or(0, |(_, points)| *points)
            })
            .collect_vec()
    }

    /// For each applied round, (players who earned points, players who didn't)
    pub fn round_stats(&self) -> Vec<(usize, usize)> {
        self.points_earned
            .iter()
            .map(|round| {
                let earned_count = round.iter().filter(|(_, points)| *points > 0).count();
                (earned_count, round.len() - earned_count)
            })
            .collect_vec()
    }
}
