//! Core game logic and state management
//!
//! This module contains the per-room game session: the roster, the question
//! lifecycle, answer admission and scoring, deadline fencing and the
//! transition into the terminal state. It performs no I/O and owns no
//! timers; callers pass the current time, a [`Tunnel`] for outgoing
//! messages, and a scheduling closure that arms deadline alarms. All
//! mutation for one room goes through one `Game` value, so callers only need
//! to serialize access to it.

use std::{collections::HashSet, fmt::Debug, fmt::Display, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use web_time::SystemTime;

use crate::{
    AlarmMessage, TruncatedVec,
    game_id::{GameId, RoomId},
    leaderboard::{self, Standing},
    quiz::{
        question::{OptionKey, QuestionSet, Tally},
        scoring::{self, Award},
    },
    registry::PlayerRegistry,
    roster::{Actor, Id, JoinOutcome, Roster},
    session::Tunnel,
};

/// When a question may advance before its deadline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Advance once every eligible player has answered, right or wrong
    #[default]
    AllAttempted,
    /// Advance early only when every eligible player answered correctly;
    /// otherwise the deadline decides
    AllCorrect,
}

/// How players joining a running game are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateJoinPolicy {
    /// Late joiners may answer from the question after the one on screen
    #[default]
    NextQuestion,
    /// Late joiners may answer the question on screen
    Immediate,
    /// Joining is only possible before the game starts
    Closed,
}

/// Per-game options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Early advance rule
    pub advance_policy: AdvancePolicy,
    /// Late join rule
    pub late_join: LateJoinPolicy,
    /// How long each question stays open
    pub deadline: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            advance_policy: AdvancePolicy::default(),
            late_join: LateJoinPolicy::default(),
            deadline: Duration::from_secs(crate::constants::session::DEADLINE_SECONDS),
        }
    }
}

/// Fencing token of an armed deadline
///
/// A deadline alarm is honoured only while the game still shows the question
/// at `index` that was presented at `presented_at`; anything else is a stale
/// fire from a question that already moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    /// Index of the question the deadline belongs to
    pub index: usize,
    /// When that question was presented
    pub presented_at: SystemTime,
}

/// The coarse lifecycle phase of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
pub enum Phase {
    /// Roster open, no questions yet
    #[display("announced")]
    Announced,
    /// Questions flowing
    #[display("running")]
    Active,
    /// Terminal
    #[display("over")]
    Ended,
}

/// A command that can be rejected for being issued in the wrong phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
pub enum Action {
    /// Joining the roster
    #[display("join")]
    Join,
    /// Starting the game
    #[display("start the game")]
    Start,
    /// Answering a question
    #[display("answer")]
    Answer,
    /// Advancing to the next question
    #[display("skip to the next question")]
    Advance,
    /// Ending the game early
    #[display("end the game")]
    ForceEnd,
    /// Announcing a new game over an existing one
    #[display("announce a new game")]
    Announce,
}

/// Errors returned by game transitions
///
/// None of these change the game's state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The command is not valid in the current phase
    #[error("cannot {action} while the game is {phase}")]
    InvalidTransition {
        /// What was attempted
        action: Action,
        /// The phase the game was in
        phase: Phase,
    },
    /// The game cannot start without players
    #[error("no players have joined yet")]
    EmptyRoster,
    /// A question batch is already being fetched for this game
    #[error("the game is already being started")]
    StartInProgress,
    /// The actor is not on the roster
    #[error("you must /join_trivia first")]
    NotJoined,
    /// The actor joined after the current question was shown
    #[error("you joined after this question was shown, wait for the next one")]
    NotEligible,
    /// The actor already answered the current question
    #[error("you already answered this question")]
    DuplicateAnswer,
    /// The option key is not part of the current question
    #[error("that option is not part of this question")]
    UnknownOption,
    /// A deadline fired for a question that is no longer current
    #[error("deadline no longer matches the current question")]
    StaleTimer,
}

impl Error {
    /// Whether this error is a wrong-state rejection rather than a
    /// per-answer one
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::EmptyRoster | Self::StartInProgress
        )
    }
}

/// Why a question advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdvanceReason {
    /// The deadline elapsed
    Deadline,
    /// An administrator skipped ahead
    Manual,
    /// Every eligible player has answered
    AllAnswered,
}

/// Statistics of one question, reported when it advances
#[derive(Debug, Clone, Serialize)]
pub struct QuestionSummary {
    /// Why the question advanced
    pub reason: AdvanceReason,
    /// Text of the correct option(s)
    pub correct_answer: String,
    /// Number of correct answers
    pub correct: usize,
    /// Number of answers
    pub attempted: usize,
    /// Number of players allowed to answer
    pub players: usize,
    /// Answer count per option text, in key order
    pub tally: Vec<(String, usize)>,
}

/// Result of an accepted answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    /// Points credited, `None` for a wrong answer
    pub award: Option<Award>,
    /// Whether the answer completed the question and advanced the game
    pub advanced: bool,
}

/// Messages the game sends into its room
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub enum UpdateMessage {
    /// Rules shown when a game is announced
    Announcement {
        /// Seconds each question stays open
        deadline_secs: u64,
    },
    /// A new participant joined
    Joined {
        /// Display name
        name: String,
        /// Roster size after joining
        count: usize,
        /// Whether the participant must wait for the next question
        waiting: bool,
    },
    /// (PRIVATE) The participant was already on the roster
    AlreadyJoined,
    /// The question batch arrived and play begins
    Starting {
        /// Roster size
        players: usize,
        /// Number of questions
        questions: usize,
    },
    /// A question being presented
    Question {
        /// Index of the question (0-based)
        index: usize,
        /// Total number of questions
        count: usize,
        /// Question text
        prompt: String,
        /// Catalog category
        category: Option<String>,
        /// Seconds to answer
        deadline_secs: u64,
        /// Roster size
        players: usize,
        /// Whether new players may still join
        open: bool,
    },
    /// (PRIVATE) The answer was correct
    Correct {
        /// Points credited
        award: Award,
        /// Seconds since the question was presented
        elapsed_secs: f64,
    },
    /// (PRIVATE) The answer was wrong
    Wrong,
    /// A correct answer fast enough to be announced
    FastAnswer {
        /// Display name
        name: String,
        /// Seconds since the question was presented
        elapsed_secs: f64,
        /// Points credited
        points: u64,
    },
    /// A question advanced
    Summary(QuestionSummary),
    /// An administrator ended the game early
    ForceEnded {
        /// Questions shown
        completed: usize,
        /// Questions fetched
        total: usize,
        /// Roster size
        players: usize,
        /// Share of correct answers among all answers, in percent
        accuracy: f64,
    },
    /// Final standings
    Results(TruncatedVec<Standing>),
}

fn players(count: usize) -> String {
    pluralizer::pluralize("player", count as isize, true)
}

impl Display for UpdateMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Announcement { deadline_secs } => write!(
                f,
                "🎮 A trivia game has been announced!\n\n\
                 Rules:\n\
                 1. Use /join_trivia to take part\n\
                 2. A correct answer scores 1 point plus a speed bonus:\n   \
                 +3 within 5s, +2 within 15s, +1 within 30s\n\
                 3. One answer per player per question\n\
                 4. Questions advance after {deadline_secs} seconds\n\
                 5. Check rankings with /leaderboard\n\n\
                 An admin starts the game with /start_game"
            ),
            Self::Joined {
                name,
                count,
                waiting,
            } => {
                write!(f, "✅ Welcome {name}! {} registered.", players(*count))?;
                if *waiting {
                    write!(f, "\nYou can answer from the next question.")?;
                }
                Ok(())
            }
            Self::AlreadyJoined => write!(f, "ℹ️ You're already registered for this game!"),
            Self::Starting { players: count, questions } => write!(
                f,
                "🎯 The game is starting with {} and {}!",
                players(*count),
                pluralizer::pluralize("question", *questions as isize, true)
            ),
            Self::Question {
                index,
                count,
                prompt,
                category,
                deadline_secs,
                players: count_players,
                open,
            } => {
                write!(f, "❓ Question {}/{count}\n\n", index + 1)?;
                if let Some(category) = category {
                    write!(f, "Category: {category}\n\n")?;
                }
                write!(
                    f,
                    "{prompt}\n\n⏱ {deadline_secs} seconds to answer!\n👥 Current players: {count_players}"
                )?;
                if *open {
                    write!(f, "\nNew players can join anytime with /join_trivia")?;
                }
                Ok(())
            }
            Self::Correct {
                award,
                elapsed_secs,
            } => {
                if award.bonus > 0 {
                    write!(
                        f,
                        "✅ Correct! Speed bonus: +{} ({elapsed_secs:.1}s)",
                        award.bonus
                    )
                } else {
                    write!(f, "✅ Correct!")
                }
            }
            Self::Wrong => write!(f, "❌ Wrong answer!"),
            Self::FastAnswer {
                name,
                elapsed_secs,
                points,
            } => write!(
                f,
                "🏃 Amazing speed by {name}!\nTime: {elapsed_secs:.1}s\nPoints earned: {points}"
            ),
            Self::Summary(summary) => {
                let header = match summary.reason {
                    AdvanceReason::Deadline => "⏰ Time's up!",
                    AdvanceReason::Manual => "⏭ Moving to the next question.",
                    AdvanceReason::AllAnswered => "🎯 Everyone has answered!",
                };
                write!(
                    f,
                    "{header}\n\n📊 Question summary:\n\
                     ✅ Correct answers: {}/{}\n\
                     👥 Players who answered: {}/{}\n\
                     ✨ Correct answer: {}",
                    summary.correct,
                    summary.players,
                    summary.attempted,
                    summary.players,
                    summary.correct_answer
                )?;
                for (option, count) in &summary.tally {
                    write!(f, "\n• {option}: {count}")?;
                }
                Ok(())
            }
            Self::ForceEnded {
                completed,
                total,
                players: count,
                accuracy,
            } => write!(
                f,
                "🛑 The game was ended by an administrator.\n\n📊 Game statistics:\n\
                 • Questions completed: {completed}/{total}\n\
                 • Total players: {count}\n\
                 • Overall accuracy: {accuracy:.1}%"
            ),
            Self::Results(standings) => write!(
                f,
                "🏁 Game over! Final results:\n\n{}",
                leaderboard::render_standings(standings)
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct CurrentQuestion {
    index: usize,
    presented_at: SystemTime,
    attempted: HashSet<Id>,
    correct: HashSet<Id>,
    tally: Tally,
    /// Armed deadline; `None` once cancelled
    deadline: Option<Deadline>,
}

impl CurrentQuestion {
    fn new(deadline: Deadline) -> Self {
        Self {
            index: deadline.index,
            presented_at: deadline.presented_at,
            attempted: HashSet::new(),
            correct: HashSet::new(),
            tally: Tally::default(),
            deadline: Some(deadline),
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Announced,
    Active(CurrentQuestion),
    Ended {
        forced: bool,
        /// Question index at the moment the game ended
        index: usize,
    },
}

/// One room's trivia game
pub struct Game {
    room: RoomId,
    id: GameId,
    options: Options,
    roster: Roster,
    questions: Option<QuestionSet>,
    state: State,
    /// Set while a question batch is being fetched
    starting: bool,
    /// Set once the roster has been folded into the registry
    settled: bool,
    answers_total: u64,
    correct_total: u64,
}

impl Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("room", &self.room)
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// Queries
impl Game {
    /// The room this game runs in
    pub fn room(&self) -> RoomId {
        self.room
    }

    /// Unique id of this game
    pub fn id(&self) -> GameId {
        self.id
    }

    /// The options this game was announced with
    pub fn options(&self) -> Options {
        self.options
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        match self.state {
            State::Announced => Phase::Announced,
            State::Active(_) => Phase::Active,
            State::Ended { .. } => Phase::Ended,
        }
    }

    /// Whether the game reached its terminal state
    pub fn is_ended(&self) -> bool {
        matches!(self.state, State::Ended { .. })
    }

    /// Whether the game was ended by an administrator
    pub fn was_forced(&self) -> bool {
        matches!(self.state, State::Ended { forced: true, .. })
    }

    /// The participants
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Number of questions fetched, 0 before the game starts
    pub fn question_count(&self) -> usize {
        self.questions.as_ref().map_or(0, QuestionSet::len)
    }

    /// The current question index; never decreases and never exceeds
    /// `question_count()`
    pub fn current_index(&self) -> usize {
        match &self.state {
            State::Announced => 0,
            State::Active(current) => current.index,
            State::Ended { index, .. } => *index,
        }
    }

    /// The deadline currently armed, if any
    pub fn armed_deadline(&self) -> Option<Deadline> {
        match &self.state {
            State::Active(current) => current.deadline,
            _ => None,
        }
    }

    /// Number of answers to the current question
    pub fn attempted_count(&self) -> usize {
        match &self.state {
            State::Active(current) => current.attempted.len(),
            _ => 0,
        }
    }

    /// Number of correct answers to the current question
    pub fn correct_count(&self) -> usize {
        match &self.state {
            State::Active(current) => current.correct.len(),
            _ => 0,
        }
    }

    /// Whether `id` answered the current question
    pub fn has_attempted(&self, id: Id) -> bool {
        matches!(&self.state, State::Active(current) if current.attempted.contains(&id))
    }

    /// Whether `id` answered the current question correctly
    pub fn has_answered_correctly(&self, id: Id) -> bool {
        matches!(&self.state, State::Active(current) if current.correct.contains(&id))
    }

    /// Ranked standings of this game
    pub fn standings(&self) -> TruncatedVec<Standing> {
        leaderboard::current(&self.roster)
    }

    /// Whether the roster has already been credited to the registry
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    fn summary(&self, current: &CurrentQuestion, reason: AdvanceReason) -> QuestionSummary {
        let question = self
            .questions
            .as_ref()
            .and_then(|questions| questions.get(current.index));

        QuestionSummary {
            reason,
            correct_answer: question.map(|q| q.correct_text()).unwrap_or_default(),
            correct: current.correct.len(),
            attempted: current.attempted.len(),
            players: self.roster.eligible_count(current.index),
            tally: question
                .map(|q| {
                    OptionKey::ALL
                        .into_iter()
                        .filter_map(|key| Some((q.option(key)?.to_owned(), current.tally[key])))
                        .collect_vec()
                })
                .unwrap_or_default(),
        }
    }
}

// Transitions
impl Game {
    /// Creates a game in the announced phase
    pub fn new(room: RoomId, options: Options) -> Self {
        Self {
            room,
            id: GameId::new(),
            options,
            roster: Roster::default(),
            questions: None,
            state: State::Announced,
            starting: false,
            settled: false,
            answers_total: 0,
            correct_total: 0,
        }
    }

    /// Creates a game and broadcasts its rules
    pub fn announce<T: Tunnel>(room: RoomId, options: Options, tunnel: &T) -> Self {
        let game = Self::new(room, options);
        tunnel.broadcast(
            room,
            &UpdateMessage::Announcement {
                deadline_secs: options.deadline.as_secs(),
            }
            .to_string(),
        );
        game
    }

    /// Adds `actor` to the roster
    ///
    /// Joining twice refreshes the display name and sends a private notice.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the game is over or closed to
    /// late joiners.
    pub fn join<T: Tunnel>(&mut self, actor: &Actor, tunnel: &T) -> Result<JoinOutcome, Error> {
        let eligible_from = match (&self.state, self.options.late_join) {
            (State::Announced, _) => 0,
            (State::Active(current), LateJoinPolicy::NextQuestion) => current.index + 1,
            (State::Active(current), LateJoinPolicy::Immediate) => current.index,
            (State::Active(_), LateJoinPolicy::Closed) | (State::Ended { .. }, _) => {
                return Err(Error::InvalidTransition {
                    action: Action::Join,
                    phase: self.phase(),
                });
            }
        };

        let outcome = self.roster.join(actor, eligible_from);

        match outcome {
            JoinOutcome::Joined(count) => tunnel.broadcast(
                self.room,
                &UpdateMessage::Joined {
                    name: actor.name.clone(),
                    count,
                    waiting: eligible_from > self.current_index(),
                }
                .to_string(),
            ),
            JoinOutcome::AlreadyJoined => tunnel.notify(
                self.room,
                actor.id,
                &UpdateMessage::AlreadyJoined.to_string(),
            ),
        }

        Ok(outcome)
    }

    /// Reserves the game for starting, before the question batch is fetched
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the game is announced,
    /// `Error::EmptyRoster` if nobody joined, and `Error::StartInProgress`
    /// if another start is already fetching.
    pub fn begin_start(&mut self) -> Result<(), Error> {
        if !matches!(self.state, State::Announced) {
            return Err(Error::InvalidTransition {
                action: Action::Start,
                phase: self.phase(),
            });
        }
        if self.roster.is_empty() {
            return Err(Error::EmptyRoster);
        }
        if self.starting {
            return Err(Error::StartInProgress);
        }

        self.starting = true;
        Ok(())
    }

    /// Releases a start reservation after a failed fetch; the roster is kept
    pub fn abort_start(&mut self) {
        self.starting = false;
    }

    /// Installs the fetched questions and presents the first one
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the game is announced.
    pub fn commit_start<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        questions: QuestionSet,
        now: SystemTime,
        tunnel: &T,
        schedule: S,
    ) -> Result<(), Error> {
        if !matches!(self.state, State::Announced) {
            return Err(Error::InvalidTransition {
                action: Action::Start,
                phase: self.phase(),
            });
        }

        self.starting = false;
        tunnel.broadcast(
            self.room,
            &UpdateMessage::Starting {
                players: self.roster.len(),
                questions: questions.len(),
            }
            .to_string(),
        );
        self.questions = Some(questions);
        self.present(0, now, tunnel, schedule);

        Ok(())
    }

    /// Starts the game with an already fetched question batch
    ///
    /// # Errors
    ///
    /// See [`Game::begin_start`].
    pub fn start<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        questions: QuestionSet,
        now: SystemTime,
        tunnel: &T,
        schedule: S,
    ) -> Result<(), Error> {
        self.begin_start()?;
        self.commit_start(questions, now, tunnel, schedule)
    }

    /// Presents the question at `index`, or ends the game past the last one
    fn present<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        index: usize,
        now: SystemTime,
        tunnel: &T,
        mut schedule: S,
    ) {
        let count = self.question_count();
        if index >= count {
            self.finish(false, count, tunnel);
            return;
        }

        let Some(question) = self.questions.as_ref().and_then(|q| q.get(index)) else {
            return;
        };

        let message = UpdateMessage::Question {
            index,
            count,
            prompt: question.prompt().to_owned(),
            category: question.category().map(str::to_owned),
            deadline_secs: self.options.deadline.as_secs(),
            players: self.roster.len(),
            open: self.options.late_join != LateJoinPolicy::Closed,
        };
        tunnel.present(self.room, &message.to_string(), &question.shuffled_options());

        let deadline = Deadline {
            index,
            presented_at: now,
        };
        self.state = State::Active(CurrentQuestion::new(deadline));
        schedule(deadline.into(), self.options.deadline);
    }

    /// Reports the current question and presents the next one
    fn advance<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        reason: AdvanceReason,
        now: SystemTime,
        tunnel: &T,
        schedule: S,
    ) {
        let State::Active(current) = &self.state else {
            return;
        };

        let next = current.index + 1;
        let summary = self.summary(current, reason);
        tunnel.broadcast(self.room, &UpdateMessage::Summary(summary).to_string());

        self.present(next, now, tunnel, schedule);
    }

    /// Moves into the terminal state and broadcasts the final standings
    fn finish<T: Tunnel>(&mut self, forced: bool, index: usize, tunnel: &T) {
        self.state = State::Ended { forced, index };
        tunnel.broadcast(
            self.room,
            &UpdateMessage::Results(self.standings()).to_string(),
        );
    }

    /// Records `actor`'s answer to the current question
    ///
    /// The first answer of each participant is final. A correct answer earns
    /// 1 point plus the speed bonus for the time since presentation. When
    /// the advance policy is met the game moves on immediately.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the game is running,
    /// `Error::NotJoined` / `Error::NotEligible` for actors who may not
    /// answer, `Error::UnknownOption` for keys the question lacks and
    /// `Error::DuplicateAnswer` for a second answer. Rejected answers change
    /// nothing.
    pub fn submit_answer<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        actor: Id,
        key: OptionKey,
        arrival: SystemTime,
        tunnel: &T,
        schedule: S,
    ) -> Result<AnswerOutcome, Error> {
        let phase = self.phase();
        let State::Active(current) = &mut self.state else {
            return Err(Error::InvalidTransition {
                action: Action::Answer,
                phase,
            });
        };

        let Some(participant) = self.roster.get_mut(actor) else {
            return Err(Error::NotJoined);
        };
        if !participant.is_eligible(current.index) {
            return Err(Error::NotEligible);
        }
        if current.attempted.contains(&actor) {
            return Err(Error::DuplicateAnswer);
        }
        let Some(question) = self
            .questions
            .as_ref()
            .and_then(|questions| questions.get(current.index))
            .filter(|question| question.has_option(key))
        else {
            return Err(Error::UnknownOption);
        };

        current.attempted.insert(actor);
        current.tally[key] += 1;
        self.answers_total += 1;

        let award = if question.is_correct(key) {
            current.correct.insert(actor);
            self.correct_total += 1;

            let elapsed = arrival
                .duration_since(current.presented_at)
                .unwrap_or_default();
            let award = scoring::award(elapsed);
            participant.credit(award.points, award.bonus);

            let elapsed_secs = elapsed.as_secs_f64();
            tunnel.notify(
                self.room,
                actor,
                &UpdateMessage::Correct {
                    award,
                    elapsed_secs,
                }
                .to_string(),
            );
            if award.bonus >= crate::constants::scoring::BROADCAST_BONUS {
                tunnel.broadcast(
                    self.room,
                    &UpdateMessage::FastAnswer {
                        name: participant.name().to_owned(),
                        elapsed_secs,
                        points: award.points,
                    }
                    .to_string(),
                );
            }

            Some(award)
        } else {
            tunnel.notify(self.room, actor, &UpdateMessage::Wrong.to_string());
            None
        };

        let eligible = self.roster.eligible_count(current.index);
        let everyone = current.correct.len() >= eligible
            || (self.options.advance_policy == AdvancePolicy::AllAttempted
                && current.attempted.len() >= eligible);

        if everyone {
            self.advance(AdvanceReason::AllAnswered, arrival, tunnel, schedule);
        }

        Ok(AnswerOutcome {
            award,
            advanced: everyone,
        })
    }

    /// Cancels the armed deadline and moves to the next question
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the game is running.
    pub fn advance_manually<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        now: SystemTime,
        tunnel: &T,
        schedule: S,
    ) -> Result<(), Error> {
        let phase = self.phase();
        let State::Active(current) = &mut self.state else {
            return Err(Error::InvalidTransition {
                action: Action::Advance,
                phase,
            });
        };

        current.deadline = None;
        self.advance(AdvanceReason::Manual, now, tunnel, schedule);

        Ok(())
    }

    /// Handles a scheduled alarm
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleTimer` when the alarm's fencing token no longer
    /// matches the armed deadline; the game is left untouched.
    pub fn receive_alarm<T: Tunnel, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        message: AlarmMessage,
        now: SystemTime,
        tunnel: &T,
        schedule: S,
    ) -> Result<(), Error> {
        match message {
            AlarmMessage::Deadline(deadline) => match &self.state {
                State::Active(current) if current.deadline == Some(deadline) => {
                    self.advance(AdvanceReason::Deadline, now, tunnel, schedule);
                    Ok(())
                }
                _ => Err(Error::StaleTimer),
            },
        }
    }

    /// Ends a running game immediately
    ///
    /// Tracked game messages are deleted, statistics and final standings are
    /// broadcast, and the armed deadline is dropped with the question state.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the game is running.
    pub fn force_end<T: Tunnel>(&mut self, tunnel: &T) -> Result<(), Error> {
        let State::Active(current) = &self.state else {
            return Err(Error::InvalidTransition {
                action: Action::ForceEnd,
                phase: self.phase(),
            });
        };
        let index = current.index;

        tunnel.delete_tracked(self.room);
        tunnel.broadcast(
            self.room,
            &UpdateMessage::ForceEnded {
                completed: index + 1,
                total: self.question_count(),
                players: self.roster.len(),
                accuracy: if self.answers_total == 0 {
                    0.
                } else {
                    self.correct_total as f64 / self.answers_total as f64 * 100.
                },
            }
            .to_string(),
        );

        self.finish(true, index, tunnel);
        Ok(())
    }

    /// Credits this game's roster to the all-time registry
    ///
    /// Runs at most once per game, whichever transition ended it.
    ///
    /// # Returns
    ///
    /// `true` if the registry was updated by this call
    pub fn settle(&mut self, registry: &mut PlayerRegistry) -> bool {
        if !self.is_ended() || self.settled {
            return false;
        }

        leaderboard::fold_into(&self.roster, registry);
        self.settled = true;
        true
    }
}
