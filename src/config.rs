//! Session options
//!
//! Everything a host may tune about a session. Durations of rounds and
//! countdowns are counted in ticks of the session clock; the tick itself is
//! a wall-clock duration so tests and demos can run the same protocol fast.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants::timing, names::NameStyle};

/// Validates that the tick length falls within the allowed bounds
fn validate_tick(val: &Duration) -> garde::Result {
    if (timing::MIN_TICK_MILLIS..=timing::MAX_TICK_MILLIS).contains(&(val.as_millis() as u64)) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "tick is outside of the bounds [{}ms,{}ms]",
            timing::MIN_TICK_MILLIS,
            timing::MAX_TICK_MILLIS
        )))
    }
}

/// Errors that can occur while loading options
#[derive(Error, Debug)]
pub enum Error {
    /// The input was not valid JSON for [`Options`]
    #[error("malformed options: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid options: {0}")]
    Invalid(#[from] garde::Report),
}

/// Tunable behaviour of one session
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Ticks a round accepts answers for
    #[garde(range(min = timing::MIN_ROUND_DURATION, max = timing::MAX_ROUND_DURATION))]
    round_duration: u64,
    /// Ticks between a reveal and the next question
    #[garde(range(min = timing::MIN_COUNTDOWN, max = timing::MAX_COUNTDOWN))]
    countdown: u64,
    /// Length of one tick
    #[garde(custom(|v, _| validate_tick(v)))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    tick: Duration,
    /// Whether the first join starts the session
    #[garde(skip)]
    auto_start: bool,
    /// Whether `newQuestion` carries the correct option, for legacy clients
    #[garde(skip)]
    reveal_answer_on_issue: bool,
    /// Style for generated player names (None means players choose their own)
    #[garde(dive)]
    random_names: Option<NameStyle>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            round_duration: timing::DEFAULT_ROUND_DURATION,
            countdown: timing::DEFAULT_COUNTDOWN,
            tick: Duration::from_millis(timing::DEFAULT_TICK_MILLIS),
            auto_start: true,
            reveal_answer_on_issue: false,
            random_names: None,
        }
    }
}

impl Options {
    /// Parses and validates options from JSON, missing fields take defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` for malformed input and `Error::Invalid` for
    /// values outside their bounds.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let options: Options = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the round duration in ticks, clamped to the allowed range
    #[must_use]
    pub fn with_round_duration(mut self, ticks: u64) -> Self {
        self.round_duration = ticks.clamp(timing::MIN_ROUND_DURATION, timing::MAX_ROUND_DURATION);
        self
    }

    /// Sets the countdown between rounds in ticks, clamped to the allowed
    /// range
    #[must_use]
    pub fn with_countdown(mut self, ticks: u64) -> Self {
        self.countdown = ticks.clamp(timing::MIN_COUNTDOWN, timing::MAX_COUNTDOWN);
        self
    }

    /// Sets the tick length, clamped to the allowed range
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.clamp(
            Duration::from_millis(timing::MIN_TICK_MILLIS),
            Duration::from_millis(timing::MAX_TICK_MILLIS),
        );
        self
    }

    /// Sets whether the first join starts the session
    #[must_use]
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Sets whether `newQuestion` carries the correct option
    #[must_use]
    pub fn with_reveal_answer_on_issue(mut self, reveal: bool) -> Self {
        self.reveal_answer_on_issue = reveal;
        self
    }

    /// Sets the style of generated names
    #[must_use]
    pub fn with_random_names(mut self, style: Option<NameStyle>) -> Self {
        self.random_names = style;
        self
    }

    /// Ticks a round accepts answers for
    pub fn round_duration(&self) -> u64 {
        self.round_duration
    }

    /// Ticks between a reveal and the next question
    pub fn countdown(&self) -> u64 {
        self.countdown
    }

    /// Length of one tick
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Whether the first join starts the session
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    /// Whether `newQuestion` carries the correct option
    pub fn reveal_answer_on_issue(&self) -> bool {
        self.reveal_answer_on_issue
    }

    /// Style for generated player names
    pub fn random_names(&self) -> Option<NameStyle> {
        self.random_names
    }

    /// Wall-clock time a round accepts answers for
    pub fn round_time(&self) -> Duration {
        self.tick
            .saturating_mul(u32::try_from(self.round_duration).unwrap_or(u32::MAX))
    }
}
