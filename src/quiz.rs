//! Quiz and question definitions
//!
//! This module defines the static content of a game: an ordered sequence of
//! multiple choice questions with a single correct option each. A quiz is
//! immutable once a session is created from it; all runtime state lives in
//! the session.

use garde::Validate;
use serde::{Deserialize, Serialize};
use web_time::Duration;

type ValidationResult = garde::Result;

/// Validates that a question's time limit falls within the allowed bounds
fn validate_time_limit(val: &Duration) -> ValidationResult {
    let secs = val.as_secs();
    let min = crate::constants::quiz::MIN_TIME_LIMIT;
    let max = crate::constants::quiz::MAX_TIME_LIMIT;
    if (min..=max).contains(&secs) && val.subsec_nanos() == 0 {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "time_limit must be a whole number of seconds in [{min},{max}]",
        )))
    }
}

/// A complete quiz: a title and the ordered questions that will be played.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Quiz {
    /// Stable identifier for the quiz (opaque to the core)
    #[garde(skip)]
    pub id: String,
    /// Display title shown on waiting and summary screens
    #[garde(length(max = crate::constants::quiz::MAX_TITLE_LENGTH))]
    pub title: String,
    /// The questions, in play order
    #[garde(length(min = 1, max = crate::constants::quiz::MAX_QUESTION_COUNT), dive)]
    pub questions: Vec<Question>,
}

/// A single multiple choice question.
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Stable identifier, echoed back by answer submissions so stale
    /// submissions for an already-advanced question can be detected
    #[garde(skip)]
    pub id: String,
    /// The prompt text displayed to players
    #[garde(length(max = crate::constants::quiz::MAX_PROMPT_LENGTH))]
    pub prompt: String,
    /// The answer options, exactly one of which is correct
    #[garde(
        length(
            min = crate::constants::quiz::MIN_OPTION_COUNT,
            max = crate::constants::quiz::MAX_OPTION_COUNT,
        ),
        inner(length(max = crate::constants::quiz::MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
    /// Index into `options` of the correct answer
    #[garde(skip)]
    pub correct_answer: usize,
    /// Time players have to answer once the question starts
    #[garde(custom(|v, _| validate_time_limit(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub time_limit: Duration,
}

/// The view of a question broadcast to the room when it starts.
///
/// The correct-answer index is deliberately withheld; it is only revealed
/// in the question-ended event.
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    /// Stable question identifier, echoed back by submissions
    pub id: String,
    /// The prompt text
    pub prompt: String,
    /// The answer options
    pub options: Vec<String>,
    /// Time limit in whole seconds
    pub time_limit: u64,
}

impl Question {
    /// Returns the question's time limit in whole seconds
    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit.as_secs()
    }

    /// Produces the answer-withheld view sent to the room
    pub fn public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id.clone(),
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            time_limit: self.time_limit_seconds(),
        }
    }
}

impl Quiz {
    /// Returns the number of questions in the quiz
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Checks whether the quiz contains no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Validates field constraints and cross-field consistency.
    ///
    /// Runs the declarative [`garde`] validation and additionally checks
    /// that every question's correct-answer index points at one of its
    /// options, which a per-field validator cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidQuiz`] describing the first problem
    /// found.
    pub fn validate_content(&self) -> Result<(), crate::Error> {
        self.validate()
            .map_err(|report| crate::Error::InvalidQuiz(report.to_string()))?;

        for (index, question) in self.questions.iter().enumerate() {
            if question.correct_answer >= question.options.len() {
                return Err(crate::Error::InvalidQuiz(format!(
                    "question {index}: correct_answer {} is out of range for {} options",
                    question.correct_answer,
                    question.options.len(),
                )));
            }
        }

        Ok(())
    }
}
