//! Display names
//!
//! A display name is the only identity a player has. Requested names are
//! trimmed, bounded in length, screened for profanity and kept unique among
//! the players currently in the session; uniqueness ignores case so "Ann"
//! and "ann" cannot both appear on the scoreboard. A name is free again as
//! soon as its holder leaves.

use std::collections::{HashMap, hash_map::Entry};

use heck::ToTitleCase;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants, registry::Id};

/// How generated names look when a session hands out names itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, garde::Validate)]
pub enum NameStyle {
    /// "Gaius Julius Caesar"; two or three parts
    Roman(#[garde(range(min = 2, max = 3))] usize),
    /// "Brave Otter"; two or three words
    Petname(#[garde(range(min = 2, max = 3))] usize),
}

impl Default for NameStyle {
    fn default() -> Self {
        Self::Petname(2)
    }
}

impl NameStyle {
    /// A fresh title-cased name; may collide with one already taken
    pub fn generate(&self) -> String {
        let raw = match *self {
            Self::Roman(parts) => romanname::romanname(romanname::NameConfig {
                praenomen: parts > 2,
            }),
            Self::Petname(words) => petname::petname(words as u8, " ").unwrap_or_default(),
        };
        raw.to_title_case()
    }
}

/// Why a requested name was refused
///
/// Sent to the requester as `nameError` with the variant name as payload.
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Another player holds the name
    #[error("name is taken")]
    Used,
    /// The connection already joined
    #[error("already joined under another name")]
    Assigned,
    /// Nothing left after trimming
    #[error("name is blank")]
    Empty,
    /// Caught by the profanity filter
    #[error("name is not allowed")]
    Sinful,
    /// Longer than the allowed length
    #[error("name is longer than {} characters", constants::names::MAX_LENGTH)]
    TooLong,
}

/// Names held by the players of one session
#[derive(Debug, Default, Clone)]
pub struct Names {
    by_player: HashMap<Id, String>,
    // keyed by the lowercased name
    holders: HashMap<String, Id>,
}

impl Names {
    /// Validates `requested` and records it for `id`, returning the stored
    /// (trimmed) form
    ///
    /// # Errors
    ///
    /// Checked in this order: `TooLong`, `Empty`, `Sinful`, `Assigned`, `Used`.
    pub fn set_name(&mut self, id: Id, requested: &str) -> Result<String, Error> {
        let name = rustrict::trim_whitespace(requested);
        if name.chars().count() > constants::names::MAX_LENGTH {
            return Err(Error::TooLong);
        }
        if name.is_empty() {
            return Err(Error::Empty);
        }
        if name.is_inappropriate() {
            return Err(Error::Sinful);
        }
        if self.by_player.contains_key(&id) {
            return Err(Error::Assigned);
        }

        let Entry::Vacant(slot) = self.holders.entry(name.to_lowercase()) else {
            return Err(Error::Used);
        };
        slot.insert(id);
        self.by_player.insert(id, name.to_owned());

        Ok(name.to_owned())
    }

    /// Frees whatever name `id` held
    pub fn release(&mut self, id: &Id) -> Option<String> {
        let name = self.by_player.remove(id)?;
        self.holders.remove(&name.to_lowercase());
        Some(name)
    }
}
