//! # Trivia Session Library
//!
//! This library provides the protocol core of a multiplayer trivia session:
//! an authoritative party issues questions, collects one answer per player
//! under a time limit, reveals the correct option, keeps score and moves on
//! to the next round. It handles player registration, the round lifecycle,
//! the session clock, score bookkeeping and fan-out to every connected
//! client.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod config;
pub mod constants;
pub mod game;
pub mod ledger;
pub mod names;
pub mod question;
pub mod registry;
pub mod round;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod session_id;

pub use runner::{SessionHandle, spawn};
pub use scheduler::AlarmMessage;

/// Messages sent to bring a single client's view up to date
///
/// Serialized without a wrapper, so clients see the inner event name
/// directly (e.g. `{"asking": {...}}`).
#[derive(Debug, Serialize, Clone, derive_more::From)]
#[serde(untagged)]
pub enum SyncMessage {
    /// Session-level synchronization
    Game(game::SyncMessage),
    /// Snapshot of the current round
    Round(round::SyncMessage),
}

impl SyncMessage {
    /// JSON text of the snapshot, as written to a client's connection
    ///
    /// # Panics
    ///
    /// Never in practice: every payload is plain data that `serde_json`
    /// always manages to encode.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Events broadcast as the session changes
///
/// Serialized without a wrapper, so clients see the event name directly
/// (e.g. `{"newQuestion": {...}}`).
#[derive(Debug, Serialize, Clone, derive_more::From)]
#[serde(untagged)]
pub enum UpdateMessage {
    /// Session-level updates
    Game(game::UpdateMessage),
    /// Round progress updates
    Round(round::UpdateMessage),
}

impl UpdateMessage {
    /// JSON text of the event, as written to a client's connection
    ///
    /// # Panics
    ///
    /// Never in practice, see [`SyncMessage::to_message`].
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// The head of a long list together with the full list's length
///
/// Standings can grow to hundreds of entries; a scoreboard only shows the
/// first few but still says how many there are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    exact_count: usize,
    items: Vec<T>,
}

impl<T> TruncatedVec<T> {
    /// Keeps at most `limit` items of `list`, recording `exact_count` as the
    /// full length
    pub fn new<I: IntoIterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        Self {
            exact_count,
            items: list.into_iter().take(limit).collect_vec(),
        }
    }

    /// Length of the full list
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// The kept head of the list
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
