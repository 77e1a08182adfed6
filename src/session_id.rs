//! Session identifiers
//!
//! Every running session gets a short random id that is used in log lines
//! and lets an embedding server keep several independent sessions apart.
//! Ids are displayed in octal so they stay five digits long and are easy to
//! read out loud.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

// five octal digits, without a leading zero
const MIN_VALUE: u16 = 0o10_000;
const MAX_VALUE: u16 = 0o100_000;

/// A unique identifier for a trivia session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct SessionId(u16);

impl SessionId {
    /// Creates a new random session id
    pub fn new() -> Self {
        Self(fastrand::u16(MIN_VALUE..MAX_VALUE))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    /// Formats the id as a 5-digit octal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:05o}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ParseIntError;

    /// Parses a session id from its octal representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string is not a valid octal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u16::from_str_radix(s, 8)?))
    }
}
