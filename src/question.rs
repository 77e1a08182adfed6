//! Questions and where they come from
//!
//! A session treats its questions as opaque: it asks a [`QuestionSource`] for
//! the next one whenever a round starts. [`Deck`] is the stock source, a
//! validated list of questions dealt in shuffled order and reshuffled once
//! every question has been asked.

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single multiple choice question
///
/// On the wire this is `{question, options, answer}` where `answer` is the
/// text of the correct option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The prompt shown to players
    #[serde(rename = "question")]
    #[garde(length(min = 1, max = crate::constants::question::MAX_TEXT_LENGTH))]
    text: String,
    /// The choices, in display order
    #[garde(
        length(
            min = crate::constants::question::MIN_OPTION_COUNT,
            max = crate::constants::question::MAX_OPTION_COUNT
        ),
        inner(length(min = 1, max = crate::constants::question::MAX_OPTION_LENGTH)),
        custom(validate_distinct)
    )]
    options: Vec<String>,
    /// The correct choice, which must be one of `options`
    #[serde(rename = "answer")]
    #[garde(custom(validate_correct_option(&self.options)))]
    correct_option: String,
}

#[allow(clippy::ptr_arg)]
fn validate_distinct(options: &Vec<String>, _ctx: &()) -> garde::Result {
    if options.iter().all_unique() {
        Ok(())
    } else {
        Err(garde::Error::new("options must be distinct"))
    }
}

fn validate_correct_option(
    options: &[String],
) -> impl FnOnce(&String, &()) -> garde::Result + '_ {
    move |correct, _| {
        if options.contains(correct) {
            Ok(())
        } else {
            Err(garde::Error::new("answer is not one of the options"))
        }
    }
}

impl Question {
    /// Creates a question, leaving validation to the caller
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
        correct_option: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            options,
            correct_option: correct_option.into(),
        }
    }

    /// The prompt shown to players
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The choices, in display order
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// The text of the correct choice
    pub fn correct_option(&self) -> &str {
        &self.correct_option
    }

    /// Index of an option by its text
    pub fn option_index(&self, option: &str) -> Option<usize> {
        self.options.iter().position(|o| o == option)
    }

    /// Index of the correct option
    pub fn correct_index(&self) -> Option<usize> {
        self.option_index(&self.correct_option)
    }
}

/// Supplies the question for each new round
pub trait QuestionSource {
    /// Returns the next question, or `None` when there is nothing left to ask
    fn next_question(&mut self) -> Option<Question>;
}

impl<F: FnMut() -> Option<Question>> QuestionSource for F {
    fn next_question(&mut self) -> Option<Question> {
        self()
    }
}

/// Errors that can occur while building a [`Deck`]
#[derive(Error, Debug)]
pub enum DeckError {
    /// The input was not a JSON list of questions
    #[error("malformed question list: {0}")]
    Json(#[from] serde_json::Error),
    /// A question failed validation
    #[error("invalid question: {0}")]
    Invalid(#[from] garde::Report),
    /// There were no questions at all
    #[error("question list is empty")]
    Empty,
}

/// A validated list of questions dealt in shuffled order
#[derive(Debug, Clone)]
pub struct Deck {
    questions: Vec<Question>,
    order: Vec<usize>,
}

impl Deck {
    /// Builds a deck after validating every question
    ///
    /// # Errors
    ///
    /// Returns `DeckError::Empty` for an empty list and `DeckError::Invalid`
    /// for the first question that fails validation.
    pub fn new(questions: Vec<Question>) -> Result<Self, DeckError> {
        if questions.is_empty() {
            return Err(DeckError::Empty);
        }
        for question in &questions {
            question.validate()?;
        }

        Ok(Self {
            questions,
            order: Vec::new(),
        })
    }

    /// Parses a JSON list of `{question, options, answer}` objects
    ///
    /// # Errors
    ///
    /// Returns `DeckError::Json` if the text does not parse, otherwise the
    /// same errors as [`Deck::new`].
    pub fn from_json(text: &str) -> Result<Self, DeckError> {
        Self::new(serde_json::from_str(text)?)
    }

    /// Number of distinct questions in the deck
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the deck holds no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    fn reshuffle(&mut self) {
        self.order = (0..self.questions.len()).collect_vec();
        fastrand::shuffle(&mut self.order);
    }
}

impl QuestionSource for Deck {
    fn next_question(&mut self) -> Option<Question> {
        if self.order.is_empty() {
            self.reshuffle();
        }
        let index = self.order.pop()?;
        self.questions.get(index).cloned()
    }
}
