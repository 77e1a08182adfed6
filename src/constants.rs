//! Configuration constants for the trivia session engine
//!
//! This module contains all the configuration limits and constraints
//! used throughout the session to ensure data integrity and provide
//! consistent boundaries for the different components.

/// Player registry limits
pub mod registry {
    /// Maximum number of connections allowed in a single session
    pub const MAX_PLAYER_COUNT: usize = 1000;
    /// Maximum number of players listed in a roster broadcast
    pub const ROSTER_LIMIT: usize = 100;
}

/// Display name limits
pub mod names {
    /// Maximum length of a display name in characters, after trimming
    pub const MAX_LENGTH: usize = 30;
}

/// Question limits
pub mod question {
    /// Maximum length of a question prompt
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Minimum number of options a question must offer
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options a question may offer
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single option
    pub const MAX_OPTION_LENGTH: usize = 200;
}

/// Round and countdown timing, counted in scheduler ticks
pub mod timing {
    /// Default number of ticks a round accepts answers for
    pub const DEFAULT_ROUND_DURATION: u64 = 15;
    /// Minimum round duration in ticks
    pub const MIN_ROUND_DURATION: u64 = 5;
    /// Maximum round duration in ticks
    pub const MAX_ROUND_DURATION: u64 = 240;
    /// Default number of ticks between a reveal and the next question
    pub const DEFAULT_COUNTDOWN: u64 = 3;
    /// Minimum countdown in ticks
    pub const MIN_COUNTDOWN: u64 = 1;
    /// Maximum countdown in ticks
    pub const MAX_COUNTDOWN: u64 = 30;
    /// Default tick length in milliseconds
    pub const DEFAULT_TICK_MILLIS: u64 = 1000;
    /// Minimum tick length in milliseconds
    pub const MIN_TICK_MILLIS: u64 = 10;
    /// Maximum tick length in milliseconds
    pub const MAX_TICK_MILLIS: u64 = 60_000;
}
