//! Configuration constants for the trivia engine
//!
//! This module contains the fixed limits and defaults used throughout the
//! engine so that validation, scoring and timing agree on the same numbers.

/// Scoring constants
pub mod scoring {
    /// Points awarded for any correct answer before the speed bonus
    pub const BASE_POINTS: u64 = 1;
    /// Answers at or under this many seconds earn the top bonus
    pub const SUPER_FAST_SECONDS: f64 = 5.;
    /// Answers at or under this many seconds earn the middle bonus
    pub const FAST_SECONDS: f64 = 15.;
    /// Answers at or under this many seconds earn the smallest bonus
    pub const QUICK_SECONDS: f64 = 30.;
    /// Bonus given to super fast answers
    pub const SUPER_FAST_BONUS: u64 = 3;
    /// Bonus given to fast answers
    pub const FAST_BONUS: u64 = 2;
    /// Bonus given to quick answers
    pub const QUICK_BONUS: u64 = 1;
    /// Bonuses at or above this value are announced to the whole room
    pub const BROADCAST_BONUS: u64 = 2;
}

/// Question constants
pub mod question {
    /// Minimum number of answer options on a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options on a question
    pub const MAX_OPTION_COUNT: usize = 4;
    /// Maximum length of a question prompt in characters
    pub const MAX_PROMPT_LENGTH: usize = 500;
    /// Maximum length of an answer option in characters
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Maximum length of a category label in characters
    pub const MAX_CATEGORY_LENGTH: usize = 100;
    /// Maximum number of questions in a single game
    pub const MAX_QUESTION_COUNT: usize = 50;
    /// Prefix used on answer callback payloads (`answer_a`, `answer_b`, ...)
    pub const CALLBACK_PREFIX: &str = "answer_";
}

/// Session timing constants
pub mod session {
    /// Seconds a question stays open before the deadline advances it
    pub const DEADLINE_SECONDS: u64 = 60;
    /// Number of questions fetched for a game
    pub const QUESTION_LIMIT: usize = 10;
}

/// Question catalog client constants
pub mod source {
    /// Default catalog endpoint
    pub const OPENTDB_URL: &str = "https://opentdb.com/api.php";
    /// Attempts made before a fetch is reported as failed
    pub const FETCH_ATTEMPTS: u32 = 3;
    /// Pause in milliseconds between fetch attempts
    pub const FETCH_BACKOFF_MILLIS: u64 = 1000;
}

/// Leaderboard constants
pub mod leaderboard {
    /// Default number of entries on the all-time board
    pub const ALL_TIME_LIMIT: usize = 10;
    /// Maximum number of rows rendered for the current game
    pub const CURRENT_LIMIT: usize = 50;
}
