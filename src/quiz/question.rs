//! Multiple choice questions and question sets
//!
//! Questions are validated when they are built so the session engine can rely
//! on every question having 2 to 4 options and at least one correct key.
//! Option keys are stable callback identifiers; the order in which options
//! are shown is reshuffled on every presentation.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::constants::question::{
    CALLBACK_PREFIX, MAX_CATEGORY_LENGTH, MAX_OPTION_COUNT, MAX_OPTION_LENGTH, MAX_PROMPT_LENGTH,
    MAX_QUESTION_COUNT, MIN_OPTION_COUNT,
};

/// Stable identifier of an answer option
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OptionKey {
    /// First option slot
    A,
    /// Second option slot
    B,
    /// Third option slot
    C,
    /// Fourth option slot
    D,
}

/// Per-option answer counts for one question
pub type Tally = EnumMap<OptionKey, usize>;

/// Error returned when an option key cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown option key: {0:?}")]
pub struct UnknownOptionKey(String);

impl OptionKey {
    /// All keys in slot order
    pub const ALL: [OptionKey; 4] = [Self::A, Self::B, Self::C, Self::D];

    fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::D => "d",
        }
    }

    /// Payload attached to the answer button for this key
    pub fn callback_data(self) -> String {
        format!("{CALLBACK_PREFIX}{self}")
    }

    /// Parses an answer button payload such as `answer_b`
    ///
    /// # Errors
    ///
    /// Returns `UnknownOptionKey` if the payload has no answer prefix or an
    /// unknown key.
    pub fn from_callback(data: &str) -> Result<Self, UnknownOptionKey> {
        data.strip_prefix(CALLBACK_PREFIX)
            .ok_or_else(|| UnknownOptionKey(data.to_owned()))?
            .parse()
    }
}

impl Display for OptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionKey {
    type Err = UnknownOptionKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownOptionKey(s.to_owned()))
    }
}

/// Errors that can occur when building a question
#[derive(Error, Debug)]
pub enum QuestionError {
    /// A field is outside its allowed bounds
    #[error("invalid question: {0}")]
    Invalid(#[from] garde::Report),
    /// A correct key refers to an option that does not exist
    #[error("correct key {0} has no matching option")]
    MissingOption(OptionKey),
}

fn validate_options(options: &BTreeMap<OptionKey, String>) -> garde::Result {
    match options
        .values()
        .find(|text| text.trim().is_empty() || text.chars().count() > MAX_OPTION_LENGTH)
    {
        Some(text) => Err(garde::Error::new(format!(
            "option text must be between 1 and {MAX_OPTION_LENGTH} characters, got {:?}",
            text
        ))),
        None => Ok(()),
    }
}

/// A multiple choice question
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct Question {
    /// The text shown to players
    #[garde(length(min = 1, max = MAX_PROMPT_LENGTH))]
    prompt: String,
    /// Option text by stable key
    #[garde(length(min = MIN_OPTION_COUNT, max = MAX_OPTION_COUNT), custom(|v, _| validate_options(v)))]
    options: BTreeMap<OptionKey, String>,
    /// Keys of the options that count as correct
    #[garde(length(min = 1))]
    correct: BTreeSet<OptionKey>,
    /// Optional catalog category
    #[garde(length(max = MAX_CATEGORY_LENGTH))]
    category: Option<String>,
}

impl Question {
    /// Builds and validates a question
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::Invalid` when a field is out of bounds and
    /// `QuestionError::MissingOption` when a correct key has no option.
    pub fn new(
        prompt: impl Into<String>,
        options: impl IntoIterator<Item = (OptionKey, String)>,
        correct: impl IntoIterator<Item = OptionKey>,
        category: Option<String>,
    ) -> Result<Self, QuestionError> {
        let question = Self {
            prompt: prompt.into(),
            options: options.into_iter().collect(),
            correct: correct.into_iter().collect(),
            category,
        };

        question.validate()?;

        if let Some(missing) = question
            .correct
            .iter()
            .find(|key| !question.options.contains_key(key))
        {
            return Err(QuestionError::MissingOption(*missing));
        }

        Ok(question)
    }

    /// The question text
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The catalog category, if known
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Text of the option stored under `key`
    pub fn option(&self, key: OptionKey) -> Option<&str> {
        self.options.get(&key).map(String::as_str)
    }

    /// Whether `key` names one of this question's options
    pub fn has_option(&self, key: OptionKey) -> bool {
        self.options.contains_key(&key)
    }

    /// Number of options
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Whether `key` is a correct answer
    pub fn is_correct(&self, key: OptionKey) -> bool {
        self.correct.contains(&key)
    }

    /// Text of all correct options, joined for display
    pub fn correct_text(&self) -> String {
        self.correct
            .iter()
            .filter_map(|key| self.option(*key))
            .join(", ")
    }

    /// Options in a fresh random display order
    pub fn shuffled_options(&self) -> Vec<(OptionKey, String)> {
        let mut options = self
            .options
            .iter()
            .map(|(key, text)| (*key, text.clone()))
            .collect_vec();
        fastrand::shuffle(&mut options);
        options
    }
}

/// The ordered questions of one game
///
/// A set is never empty, so a game that obtained one always has a first
/// question to present.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct QuestionSet {
    #[garde(length(min = 1, max = MAX_QUESTION_COUNT), dive)]
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Builds a question set
    ///
    /// # Errors
    ///
    /// Returns a `garde::Report` if `questions` is empty or too long.
    pub fn new(questions: Vec<Question>) -> Result<Self, garde::Report> {
        let set = Self { questions };
        set.validate()?;
        Ok(set)
    }

    /// Number of questions
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Always `false`; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// The question at `index`
    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use super::*;

    /// A four-option question whose only correct answer is `correct`
    pub(crate) fn question_with_answer(prompt: &str, correct: OptionKey) -> Question {
        Question::new(
            prompt,
            OptionKey::ALL.map(|key| (key, format!("option {key}"))),
            [correct],
            Some("General Knowledge".to_owned()),
        )
        .unwrap()
    }

    #[test]
    fn test_option_key_parsing() {
        assert_eq!("a".parse::<OptionKey>(), Ok(OptionKey::A));
        assert_eq!(" D ".parse::<OptionKey>(), Ok(OptionKey::D));
        assert!("e".parse::<OptionKey>().is_err());
    }

    #[test]
    fn test_option_key_callback_data() {
        assert_eq!(OptionKey::C.callback_data(), "answer_c");
        assert_eq!(OptionKey::from_callback("answer_b"), Ok(OptionKey::B));
        assert!(OptionKey::from_callback("b").is_err());
        assert!(OptionKey::from_callback("answer_z").is_err());
    }

    #[test]
    fn test_question_valid() {
        let question = question_with_answer("Capital of France?", OptionKey::B);
        assert!(question.is_correct(OptionKey::B));
        assert!(!question.is_correct(OptionKey::A));
        assert_eq!(question.correct_text(), "option b");
        assert_eq!(question.option_count(), 4);
    }

    #[test]
    fn test_question_too_few_options() {
        let result = Question::new(
            "Lonely?",
            [(OptionKey::A, "yes".to_owned())],
            [OptionKey::A],
            None,
        );
        assert!(matches!(result, Err(QuestionError::Invalid(_))));
    }

    #[test]
    fn test_question_requires_a_correct_key() {
        let result = Question::new(
            "Anything?",
            [(OptionKey::A, "x".to_owned()), (OptionKey::B, "y".to_owned())],
            [],
            None,
        );
        assert!(matches!(result, Err(QuestionError::Invalid(_))));
    }

    #[test]
    fn test_question_correct_key_must_exist() {
        let result = Question::new(
            "Which?",
            [(OptionKey::A, "x".to_owned()), (OptionKey::B, "y".to_owned())],
            [OptionKey::D],
            None,
        );
        assert!(matches!(
            result,
            Err(QuestionError::MissingOption(OptionKey::D))
        ));
    }

    #[test]
    fn test_question_blank_option_text() {
        let result = Question::new(
            "Which?",
            [(OptionKey::A, "x".to_owned()), (OptionKey::B, "  ".to_owned())],
            [OptionKey::A],
            None,
        );
        assert!(matches!(result, Err(QuestionError::Invalid(_))));
    }

    #[test]
    fn test_question_prompt_too_long() {
        let result = Question::new(
            "a".repeat(MAX_PROMPT_LENGTH + 1),
            [(OptionKey::A, "x".to_owned()), (OptionKey::B, "y".to_owned())],
            [OptionKey::A],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_shuffled_options_keep_keys() {
        let question = question_with_answer("Shuffle?", OptionKey::A);
        for _ in 0..20 {
            let shuffled = question.shuffled_options();
            assert_eq!(shuffled.len(), 4);
            for (key, text) in shuffled {
                assert_eq!(question.option(key), Some(text.as_str()));
            }
        }
    }

    #[test]
    fn test_question_set_must_not_be_empty() {
        assert!(QuestionSet::new(vec![]).is_err());

        let set = QuestionSet::new(vec![question_with_answer("One?", OptionKey::A)]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
        assert!(set.get(1).is_none());
    }
}
