//! Question catalog client
//!
//! The session engine only needs something that can turn an optional
//! category and a limit into a [`QuestionSet`]. [`OpenTdb`] is the production
//! implementation: it queries the Open Trivia Database, retries transient
//! failures a bounded number of times and decodes HTML entities in the
//! catalog text.

use std::{future::Future, time::Duration};

use itertools::Itertools;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::question::{OptionKey, Question, QuestionError, QuestionSet};
use crate::{config::Settings, constants::question::MAX_QUESTION_COUNT};

/// Errors that can occur while fetching questions
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The catalog answered with a non-success status
    #[error("catalog returned status {0}")]
    Status(StatusCode),

    /// The catalog answered with a non-zero response code
    #[error("catalog returned response code {0}")]
    ResponseCode(u8),

    /// A catalog entry could not be turned into a question
    #[error("catalog returned an invalid question: {0}")]
    Invalid(#[from] QuestionError),

    /// The batch is empty or larger than a game allows
    #[error("catalog returned an unusable batch: {0}")]
    Batch(#[from] garde::Report),
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Status(_) => true,
            // 5 is the catalog's rate limit code
            Self::ResponseCode(code) => *code == 5,
            Self::Invalid(_) | Self::Batch(_) => false,
        }
    }
}

/// A provider of question batches
pub trait QuestionSource: Send + Sync + 'static {
    /// Fetches up to `limit` questions, optionally restricted to `category`
    ///
    /// Implementations retry transient failures themselves; an error means
    /// the caller must not start a game.
    fn fetch(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<QuestionSet, FetchError>> + Send;
}

/// Runs `operation` until it succeeds, fails permanently, or `attempts` run out
///
/// Transient failures are followed by a `backoff` pause.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("Question fetch failed (attempt {attempt}/{attempts}): {e}");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Maps a friendly category name to the catalog's numeric category id
pub fn category_id(name: &str) -> Option<u32> {
    Some(match name.trim().to_lowercase().as_str() {
        "general" => 9,
        "books" => 10,
        "film" => 11,
        "music" => 12,
        "science" => 17,
        "computers" => 18,
        "sports" => 21,
        "geography" => 22,
        "history" => 23,
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    response_code: u8,
    #[serde(default)]
    results: Vec<CatalogQuestion>,
}

#[derive(Debug, Deserialize)]
struct CatalogQuestion {
    category: Option<String>,
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

impl TryFrom<CatalogQuestion> for Question {
    type Error = QuestionError;

    /// The correct answer is stored under `a` and the incorrect ones after
    /// it; display order is shuffled at presentation time.
    fn try_from(entry: CatalogQuestion) -> Result<Self, Self::Error> {
        let options = std::iter::once(entry.correct_answer)
            .chain(entry.incorrect_answers)
            .map(|text| decode(&text))
            .zip(OptionKey::ALL)
            .map(|(text, key)| (key, text))
            .collect_vec();

        Question::new(
            decode(&entry.question),
            options,
            [OptionKey::A],
            entry.category.as_deref().map(decode),
        )
    }
}

impl CatalogResponse {
    fn into_question_set(self) -> Result<QuestionSet, FetchError> {
        if self.response_code != 0 {
            return Err(FetchError::ResponseCode(self.response_code));
        }

        let questions = self
            .results
            .into_iter()
            .map(Question::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QuestionSet::new(questions)?)
    }
}

/// Client for the Open Trivia Database
#[derive(Debug, Clone)]
pub struct OpenTdb {
    client: Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl OpenTdb {
    /// Creates a client pointed at `url`
    pub fn new(client: Client, url: impl Into<String>, attempts: u32, backoff: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            attempts,
            backoff,
        }
    }

    /// Creates a client from loaded settings
    pub fn from_settings(client: Client, settings: &Settings) -> Self {
        Self::new(
            client,
            settings.source_url.clone(),
            settings.fetch_attempts,
            settings.fetch_backoff,
        )
    }

    /// Query parameters of one catalog request
    ///
    /// A batch larger than a game can hold would be rejected after the
    /// download, so the amount is clamped here.
    fn query(category: Option<u32>, limit: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("amount", limit.clamp(1, MAX_QUESTION_COUNT).to_string()),
            ("type", "multiple".to_owned()),
        ];
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        query
    }

    async fn fetch_once(
        &self,
        category: Option<u32>,
        limit: usize,
    ) -> Result<QuestionSet, FetchError> {
        let query = Self::query(category, limit);
        let response = self.client.get(&self.url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response.json::<CatalogResponse>().await?.into_question_set()
    }
}

impl QuestionSource for OpenTdb {
    async fn fetch(&self, category: Option<&str>, limit: usize) -> Result<QuestionSet, FetchError> {
        let category = category.and_then(category_id);
        with_retry(self.attempts, self.backoff, || self.fetch_once(category, limit)).await
    }
}
