//! Outbound edge of the session broadcaster
//!
//! A session never talks to a socket directly. Every message leaves through
//! a [`Tunnel`] looked up by participant id, so the same state machine can be
//! driven over WebSockets, an in-process channel, or a test recorder.

use super::{SyncMessage, UpdateMessage};

/// Trait for sending messages through a communication tunnel
///
/// Implementations wrap whatever persistent connection a client holds.
/// Sends are fire-and-forget: a tunnel that has gone away simply drops the
/// message and the client catches up on the next broadcast or sync.
pub trait Tunnel {
    /// Sends an incremental update, such as a new question or a score change
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a full snapshot of the session, used on join and on `getQuestion`
    fn send_state(&self, state: &SyncMessage);

    /// Closes the communication tunnel
    fn close(self);
}
