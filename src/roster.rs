//! Participant identity and roster management
//!
//! This module tracks everyone who joined a room's game, their per-session
//! statistics, the order in which they joined, and from which question they
//! are allowed to score.

use std::{collections::HashMap, fmt::Display, num::ParseIntError, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// A stable identifier for a chat participant
///
/// The id comes from the chat transport and survives display-name changes,
/// so it is the key for both the session roster and the all-time registry.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(i64);

impl Id {
    /// Wraps a raw user id
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The sender of a command or answer: identity plus current display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identity
    pub id: Id,
    /// Display name at the time of the event
    pub name: String,
}

impl Actor {
    /// Creates an actor, falling back to a generated name when the
    /// transport supplies an empty one
    pub fn new(id: impl Into<Id>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        let name = match name.trim() {
            "" => format!("Player {id}"),
            trimmed => trimmed.to_owned(),
        };
        Self { id, name }
    }
}

/// Per-session statistics for a participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Points earned in this session
    pub points: u64,
    /// Number of questions answered correctly
    pub correct_count: u64,
    /// Number of correct answers that earned a speed bonus
    pub speed_bonus_count: u64,
}

/// A participant in one room's game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    id: Id,
    name: String,
    stats: Stats,
    /// Position in the join sequence, used as the final ranking tie-break
    join_order: usize,
    /// First question index this participant may score on
    eligible_from: usize,
}

impl Participant {
    /// Returns the participant's identity
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the participant's display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the participant's session statistics
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Returns the position of this participant in the join sequence
    pub fn join_order(&self) -> usize {
        self.join_order
    }

    /// Whether this participant may answer the question at `index`
    pub fn is_eligible(&self, index: usize) -> bool {
        index >= self.eligible_from
    }

    /// Credits a correct answer worth `points`, of which `bonus` came from speed
    pub(crate) fn credit(&mut self, points: u64, bonus: u64) {
        self.stats.points += points;
        self.stats.correct_count += 1;
        if bonus > 0 {
            self.stats.speed_bonus_count += 1;
        }
    }
}

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new participant was added; carries the roster size after joining
    Joined(usize),
    /// The identity was already on the roster; the display name was refreshed
    AlreadyJoined,
}

/// The set of participants of one session, keyed by identity
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Roster {
    mapping: HashMap<Id, Participant>,
    next_join_order: usize,
}

impl Roster {
    /// Adds `actor` to the roster, or refreshes their display name if present
    ///
    /// The roster has no capacity limit.
    pub fn join(&mut self, actor: &Actor, eligible_from: usize) -> JoinOutcome {
        if let Some(existing) = self.mapping.get_mut(&actor.id) {
            existing.name.clone_from(&actor.name);
            return JoinOutcome::AlreadyJoined;
        }

        let join_order = self.next_join_order;
        self.next_join_order += 1;
        self.mapping.insert(
            actor.id,
            Participant {
                id: actor.id,
                name: actor.name.clone(),
                stats: Stats::default(),
                join_order,
                eligible_from,
            },
        );

        JoinOutcome::Joined(self.mapping.len())
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether nobody has joined
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Whether `id` has joined
    pub fn contains(&self, id: Id) -> bool {
        self.mapping.contains_key(&id)
    }

    /// Looks up a participant
    pub fn get(&self, id: Id) -> Option<&Participant> {
        self.mapping.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: Id) -> Option<&mut Participant> {
        self.mapping.get_mut(&id)
    }

    /// Number of participants allowed to answer the question at `index`
    pub fn eligible_count(&self, index: usize) -> usize {
        self.mapping
            .values()
            .filter(|p| p.is_eligible(index))
            .count()
    }

    /// Participants in the order they joined
    pub fn in_join_order(&self) -> Vec<&Participant> {
        self.mapping
            .values()
            .sorted_by_key(|p| p.join_order)
            .collect_vec()
    }
}
