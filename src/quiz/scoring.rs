//! Time-decayed scoring for correct answers
//!
//! A correct answer is worth a base point plus a speed bonus that shrinks in
//! steps as the answer arrives later after the question was presented.

use std::time::Duration;

use serde::Serialize;

use crate::constants::scoring::{
    BASE_POINTS, FAST_BONUS, FAST_SECONDS, QUICK_BONUS, QUICK_SECONDS, SUPER_FAST_BONUS,
    SUPER_FAST_SECONDS,
};

/// Points earned by one correct answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Award {
    /// Speed bonus in `0..=3`
    pub bonus: u64,
    /// Total points credited, base plus bonus
    pub points: u64,
}

/// Returns the speed bonus for an answer that took `elapsed` to arrive
///
/// Thresholds are inclusive: up to 5 seconds earns 3, up to 15 earns 2,
/// up to 30 earns 1, anything slower earns nothing.
pub fn bonus(elapsed: Duration) -> u64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= SUPER_FAST_SECONDS {
        SUPER_FAST_BONUS
    } else if seconds <= FAST_SECONDS {
        FAST_BONUS
    } else if seconds <= QUICK_SECONDS {
        QUICK_BONUS
    } else {
        0
    }
}

/// Returns the full award for a correct answer that took `elapsed` to arrive
pub fn award(elapsed: Duration) -> Award {
    let bonus = bonus(elapsed);
    Award {
        bonus,
        points: BASE_POINTS + bonus,
    }
}
