//! Room and game identifiers
//!
//! A [`RoomId`] names the chat room a session lives in and is supplied by the
//! chat transport. A [`GameId`] is minted every time a game is announced so
//! that log lines and late-arriving work (fetches, timers) can tell two games
//! in the same room apart.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

/// Identifier of a chat room as reported by the chat transport
///
/// Chat platforms hand out signed 64-bit ids (group chats are often
/// negative), so the id is kept as-is and displayed in decimal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct RoomId(i64);

impl RoomId {
    /// Wraps a raw chat id
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw chat id
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RoomId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoomId {
    type Err = ParseIntError;

    /// Parses a room id from its decimal representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string is not a valid signed integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A unique identifier for one announced game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(Uuid);

impl GameId {
    /// Creates a new random game ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    /// Creates a new random game ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_display_and_parse() {
        let room = RoomId::new(-1_001_234_567_890);
        assert_eq!(room.to_string(), "-1001234567890");
        assert_eq!(RoomId::from_str("-1001234567890").unwrap(), room);
    }

    #[test]
    fn test_room_id_from_str_invalid() {
        assert!(RoomId::from_str("room").is_err());
        assert!(RoomId::from_str("").is_err());
    }

    #[test]
    fn test_room_id_serializes_as_string() {
        let room = RoomId::from(42);
        let serialized = serde_json::to_string(&room).unwrap();
        assert_eq!(serialized, "\"42\"");
        let deserialized: RoomId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, room);
    }

    #[test]
    fn test_game_ids_are_unique() {
        let first = GameId::new();
        let second = GameId::default();
        assert_ne!(first, second);
    }
}
