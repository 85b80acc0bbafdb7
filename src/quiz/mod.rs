//! Questions, scoring and the question catalog
//!
//! This module groups the leaf pieces of a trivia game: the validated
//! question model, the time-decayed scoring policy, and the client that
//! fetches question batches.

pub mod question;
pub mod scoring;
pub mod source;
