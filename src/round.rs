//! A single round of questioning
//!
//! A round owns one question and the answers collected for it. It accepts at
//! most one answer per player while open, fills in a "no answer" entry for
//! every player still silent when it closes, and reveals exactly once.
//! Timing and the decision of *when* to close live in the session; the round
//! only enforces what may happen to its own data.

use std::{collections::HashMap, time::Duration};

use itertools::Itertools;
use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;
use web_time::SystemTime;

use crate::{question::Question, registry::Id};

/// Whether a round still takes answers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum RoundState {
    /// Open for answers
    #[default]
    Asking,
    /// Closed, correct option disclosed
    Revealed,
}

/// What a player has on record for a round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    /// Index of the chosen option, with the time it was accepted
    Chosen {
        /// Index into the question's options
        option: usize,
        /// When the answer was accepted
        at: SystemTime,
    },
    /// The sentinel for a player who passed or stayed silent until close
    NoAnswer,
}

impl Answer {
    /// Index of the chosen option, if any
    pub fn option(&self) -> Option<usize> {
        match self {
            Answer::Chosen { option, .. } => Some(*option),
            Answer::NoAnswer => None,
        }
    }
}

/// Reasons an answer submission is refused
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The player already has an answer on record for this round
    #[error("an answer was already recorded for this round")]
    DuplicateSubmission,
    /// The round is no longer accepting answers
    #[error("round is no longer accepting answers")]
    StaleRound,
    /// The submitted text matches none of the options
    #[error("answer is not one of the options")]
    UnknownOption,
}

/// Per-option tally shown at reveal
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct AnswerChoiceResult {
    /// Whether this option was the correct one
    pub correct: bool,
    /// Number of players who chose it
    pub count: usize,
}

/// Round messages broadcast to every client as the round progresses
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMessage {
    /// A new round has started
    NewQuestion {
        /// Round number within the session, 0-based
        round: usize,
        /// The prompt
        question: String,
        /// The choices, in display order
        options: Vec<String>,
        /// The correct option, only present for legacy clients
        answer: Option<String>,
        /// Time allowed for answering
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        duration: Duration,
    },
    /// A player's answer was accepted; carries the value, never its correctness
    AnswerSubmitted {
        /// Who answered
        player: Id,
        /// Their display name at the time
        name: Option<String>,
        /// The chosen option, or nothing for a pass
        answer: Option<String>,
    },
    /// Ticks left before the round closes
    TimeRemaining(u64),
    /// The round closed; discloses the correct option
    ShowCorrectAnswer {
        /// Round number within the session
        round: usize,
        /// The correct option
        answer: String,
        /// Per-option tallies, in option order
        results: Vec<AnswerChoiceResult>,
    },
}

/// Snapshot of the current round for a client that (re)connects mid-session
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum SyncMessage {
    /// The round is taking answers
    Asking {
        /// Round number within the session
        round: usize,
        /// The prompt
        question: String,
        /// The choices, in display order
        options: Vec<String>,
        /// The correct option, only present for legacy clients
        answer: Option<String>,
        /// Time left for answering
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        duration: Duration,
        /// Players who already have an answer on record
        answered: Vec<Id>,
        /// The requester's own choice, if they made one
        chosen: Option<String>,
    },
    /// The round has been revealed
    Revealed {
        /// Round number within the session
        round: usize,
        /// The prompt
        question: String,
        /// The choices, in display order
        options: Vec<String>,
        /// The correct option
        answer: String,
        /// Per-option tallies, in option order
        results: Vec<AnswerChoiceResult>,
        /// The requester's own choice, if they made one
        chosen: Option<String>,
    },
}

/// One question's lifecycle from issue to reveal
#[derive(Debug, Clone)]
pub struct Round {
    index: usize,
    question: Question,
    answers: HashMap<Id, Answer>,
    state: RoundState,
}

impl Round {
    /// Opens a round for a question
    pub fn new(index: usize, question: Question) -> Self {
        Self {
            index,
            question,
            answers: HashMap::new(),
            state: RoundState::Asking,
        }
    }

    /// Round number within the session
    pub fn index(&self) -> usize {
        self.index
    }

    /// The question asked in this round
    pub fn question(&self) -> &Question {
        &self.question
    }

    /// Current state of the round
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Whether the correct option has been disclosed
    pub fn is_revealed(&self) -> bool {
        self.state == RoundState::Revealed
    }

    /// All answers on record
    pub fn answers(&self) -> &HashMap<Id, Answer> {
        &self.answers
    }

    /// The answer on record for one player
    pub fn answer(&self, player: Id) -> Option<Answer> {
        self.answers.get(&player).copied()
    }

    /// Records a player's answer
    ///
    /// `None` is an explicit pass and records the "no answer" sentinel.
    ///
    /// # Errors
    ///
    /// * `Error::StaleRound` - The round has been revealed
    /// * `Error::DuplicateSubmission` - The player already has an answer on record
    /// * `Error::UnknownOption` - The text matches none of the options
    pub fn submit(&mut self, player: Id, answer: Option<&str>) -> Result<Answer, Error> {
        if self.state != RoundState::Asking {
            return Err(Error::StaleRound);
        }
        if self.answers.contains_key(&player) {
            return Err(Error::DuplicateSubmission);
        }

        let recorded = match answer {
            Some(text) => Answer::Chosen {
                option: self
                    .question
                    .option_index(text)
                    .ok_or(Error::UnknownOption)?,
                at: SystemTime::now(),
            },
            None => Answer::NoAnswer,
        };
        self.answers.insert(player, recorded);

        Ok(recorded)
    }

    /// Whether every given player has an answer on record
    pub fn all_answered(&self, players: &[Id]) -> bool {
        players.iter().all(|id| self.answers.contains_key(id))
    }

    /// Closes the round
    ///
    /// Every listed player without an answer gets the "no answer" sentinel.
    /// Returns `false`, and changes nothing, if the round was already revealed.
    pub fn reveal(&mut self, players: &[Id]) -> bool {
        if self.state != RoundState::Asking {
            return false;
        }
        self.state = RoundState::Revealed;

        for id in players {
            self.answers.entry(*id).or_insert(Answer::NoAnswer);
        }

        true
    }

    /// Whether a player's recorded answer is the correct option
    pub fn is_correct(&self, player: Id) -> bool {
        let correct = self.question.correct_index();
        self.answers
            .get(&player)
            .and_then(Answer::option)
            .is_some_and(|option| Some(option) == correct)
    }

    /// Per-option tallies, in option order
    pub fn results(&self) -> Vec<AnswerChoiceResult> {
        let counts = self.answers.values().filter_map(Answer::option).counts();
        let correct = self.question.correct_index();

        (0..self.question.options().len())
            .map(|i| AnswerChoiceResult {
                correct: Some(i) == correct,
                count: counts.get(&i).copied().unwrap_or(0),
            })
            .collect_vec()
    }

    /// Text of an option by index
    fn option_text(&self, option: Option<usize>) -> Option<String> {
        option.and_then(|i| self.question.options().get(i).cloned())
    }

    /// The `newQuestion` broadcast for this round
    pub fn question_message(&self, reveal_answer: bool, duration: Duration) -> UpdateMessage {
        UpdateMessage::NewQuestion {
            round: self.index,
            question: self.question.text().to_owned(),
            options: self.question.options().to_vec(),
            answer: reveal_answer.then(|| self.question.correct_option().to_owned()),
            duration,
        }
    }

    /// The `answerSubmitted` broadcast for an accepted answer
    pub fn answer_message(
        &self,
        player: Id,
        name: Option<String>,
        answer: Answer,
    ) -> UpdateMessage {
        UpdateMessage::AnswerSubmitted {
            player,
            name,
            answer: self.option_text(answer.option()),
        }
    }

    /// The `showCorrectAnswer` broadcast sent at reveal
    pub fn reveal_message(&self) -> UpdateMessage {
        UpdateMessage::ShowCorrectAnswer {
            round: self.index,
            answer: self.question.correct_option().to_owned(),
            results: self.results(),
        }
    }

    /// Snapshot of this round as seen by one client
    ///
    /// `remaining` is read off the session clock by the caller; the round
    /// keeps no clock of its own.
    pub fn state_message(
        &self,
        watcher: Id,
        reveal_answer: bool,
        remaining: Duration,
    ) -> SyncMessage {
        let chosen = self.option_text(self.answer(watcher).and_then(|a| a.option()));

        match self.state {
            RoundState::Asking => SyncMessage::Asking {
                round: self.index,
                question: self.question.text().to_owned(),
                options: self.question.options().to_vec(),
                answer: reveal_answer.then(|| self.question.correct_option().to_owned()),
                duration: remaining,
                answered: self.answers.keys().copied().sorted().collect_vec(),
                chosen,
            },
            RoundState::Revealed => SyncMessage::Revealed {
                round: self.index,
                question: self.question.text().to_owned(),
                options: self.question.options().to_vec(),
                answer: self.question.correct_option().to_owned(),
                results: self.results(),
                chosen,
            },
        }
    }
}
