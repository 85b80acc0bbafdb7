//! Runtime settings
//!
//! Settings are layered: built-in defaults, then an optional `trivia.toml`
//! next to the process, then `TRIVIA__*` environment variables (a `.env`
//! file is honoured). Every field has a default, so an empty environment
//! yields a working configuration.

use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::debug;

use crate::{
    constants,
    game::{AdvancePolicy, LateJoinPolicy, Options},
};

fn default_deadline() -> Duration {
    Duration::from_secs(constants::session::DEADLINE_SECONDS)
}

fn default_question_limit() -> usize {
    constants::session::QUESTION_LIMIT
}

fn default_all_time_limit() -> usize {
    constants::leaderboard::ALL_TIME_LIMIT
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("data/leaderboard.json")
}

fn default_source_url() -> String {
    constants::source::OPENTDB_URL.into()
}

fn default_fetch_attempts() -> u32 {
    constants::source::FETCH_ATTEMPTS
}

fn default_fetch_backoff() -> Duration {
    Duration::from_millis(constants::source::FETCH_BACKOFF_MILLIS)
}

/// Engine settings
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// When a question advances before its deadline
    #[serde(default)]
    pub advance_policy: AdvancePolicy,
    /// How players joining a running game are treated
    #[serde(default)]
    pub late_join: LateJoinPolicy,
    /// How long each question stays open, in seconds
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_deadline")]
    pub deadline: Duration,
    /// Number of questions fetched per game, see [`Settings::fetch_limit`]
    #[serde(default = "default_question_limit")]
    pub question_limit: usize,
    /// Category used when `start_game` names none
    #[serde(default)]
    pub default_category: Option<String>,
    /// Number of entries on the all-time board
    #[serde(default = "default_all_time_limit")]
    pub all_time_limit: usize,
    /// Where the all-time registry is stored
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Question catalog endpoint
    #[serde(default = "default_source_url")]
    pub source_url: String,
    /// Attempts made before a fetch is reported as failed
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    /// Pause between fetch attempts, in milliseconds
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_fetch_backoff")]
    pub fetch_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            advance_policy: AdvancePolicy::default(),
            late_join: LateJoinPolicy::default(),
            deadline: default_deadline(),
            question_limit: default_question_limit(),
            default_category: None,
            all_time_limit: default_all_time_limit(),
            registry_path: default_registry_path(),
            source_url: default_source_url(),
            fetch_attempts: default_fetch_attempts(),
            fetch_backoff: default_fetch_backoff(),
        }
    }
}

impl Settings {
    /// Loads settings from `trivia.toml` (optional) and the environment
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source is malformed or a value has the
    /// wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings: Settings = Config::builder()
            .add_source(File::with_name("trivia").required(false))
            .add_source(
                Environment::with_prefix("TRIVIA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!("Loaded settings: {:?}", settings);

        Ok(settings)
    }

    /// Number of questions requested per game
    ///
    /// The configured limit clamped to what a game can hold.
    pub fn fetch_limit(&self) -> usize {
        self.question_limit
            .clamp(1, constants::question::MAX_QUESTION_COUNT)
    }

    /// Per-game options derived from these settings
    pub fn game_options(&self) -> Options {
        Options {
            advance_policy: self.advance_policy,
            late_join: self.late_join,
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use config::FileFormat;

    use super::*;

    fn from_toml(source: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.deadline, Duration::from_secs(60));
        assert_eq!(settings.question_limit, 10);
        assert_eq!(settings.all_time_limit, 10);
        assert_eq!(settings.fetch_attempts, 3);
        assert_eq!(settings.advance_policy, AdvancePolicy::AllAttempted);
        assert_eq!(settings.late_join, LateJoinPolicy::NextQuestion);
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let settings = from_toml("");
        assert_eq!(settings.deadline, default_deadline());
        assert_eq!(settings.source_url, constants::source::OPENTDB_URL);
    }

    #[test]
    fn test_overrides() {
        let settings = from_toml(
            r#"
            advance_policy = "all_correct"
            late_join = "closed"
            deadline = 45
            fetch_backoff = 250
            default_category = "science"
            "#,
        );
        assert_eq!(settings.advance_policy, AdvancePolicy::AllCorrect);
        assert_eq!(settings.late_join, LateJoinPolicy::Closed);
        assert_eq!(settings.deadline, Duration::from_secs(45));
        assert_eq!(settings.fetch_backoff, Duration::from_millis(250));
        assert_eq!(settings.default_category.as_deref(), Some("science"));
    }

    #[test]
    fn test_fetch_limit_is_clamped() {
        assert_eq!(Settings::default().fetch_limit(), 10);
        assert_eq!(from_toml("question_limit = 80").fetch_limit(), 50);
        assert_eq!(from_toml("question_limit = 0").fetch_limit(), 1);
    }

    #[test]
    fn test_game_options() {
        let settings = from_toml("deadline = 20");
        let options = settings.game_options();
        assert_eq!(options.deadline, Duration::from_secs(20));
        assert_eq!(options.advance_policy, settings.advance_policy);
    }
}
