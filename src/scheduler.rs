//! The session's authoritative clock
//!
//! A session runs at most one timer at a time: either the round timer or the
//! countdown between rounds. Timers are driven through the same
//! `schedule_message` callback the rest of the crate uses, one tick at a
//! time. Each scheduled tick carries the identity of the timer that
//! scheduled it, so starting a new timer supersedes the previous one and any
//! alarm it still has in flight is ignored when it arrives.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of a started timer, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(u64);

/// Which slot a timer drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerKind {
    /// Time limit for answering the current question
    Round,
    /// Delay between a reveal and the next question
    Countdown,
}

/// Alarm delivered back to the session after a scheduled delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// One unit of time has elapsed on a timer
    Tick {
        /// The timer that scheduled this tick
        timer: TimerId,
        /// Which slot the timer drives
        kind: TimerKind,
        /// Units left once this tick is accepted
        remaining: u64,
    },
}

/// What an accepted alarm means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The timer advanced and has units left
    Tick {
        /// Which slot the timer drives
        kind: TimerKind,
        /// Units left
        remaining: u64,
    },
    /// The timer ran out; it is no longer active
    Expired {
        /// Which slot the timer drove
        kind: TimerKind,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveTimer {
    id: TimerId,
    kind: TimerKind,
    remaining: u64,
    tick: Duration,
}

/// Single-timer scheduler
#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    active: Option<ActiveTimer>,
}

impl Scheduler {
    /// Starts a timer of `units` ticks, superseding any running timer
    ///
    /// A zero length timer still waits one tick before expiring.
    pub fn start<S>(
        &mut self,
        kind: TimerKind,
        units: u64,
        tick: Duration,
        mut schedule_message: S,
    ) -> TimerId
    where
        S: FnMut(AlarmMessage, Duration),
    {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let units = units.max(1);
        self.active = Some(ActiveTimer {
            id,
            kind,
            remaining: units,
            tick,
        });
        schedule_message(
            AlarmMessage::Tick {
                timer: id,
                kind,
                remaining: units - 1,
            },
            tick,
        );

        id
    }

    /// Stops the running timer, returning its identity
    pub fn cancel(&mut self) -> Option<TimerId> {
        self.active.take().map(|timer| timer.id)
    }

    /// The running timer's slot, if any
    pub fn active_kind(&self) -> Option<TimerKind> {
        self.active.map(|timer| timer.kind)
    }

    /// Units left on the running timer, if any
    pub fn remaining(&self) -> Option<u64> {
        self.active.map(|timer| timer.remaining)
    }

    /// Applies an alarm that came due
    ///
    /// Returns `None` for alarms of superseded or cancelled timers and for
    /// repeated deliveries of a tick that was already applied. Otherwise the
    /// next tick is scheduled, or the timer is cleared on expiry.
    pub fn fire<S>(&mut self, alarm: &AlarmMessage, mut schedule_message: S) -> Option<TimerEvent>
    where
        S: FnMut(AlarmMessage, Duration),
    {
        let AlarmMessage::Tick {
            timer, remaining, ..
        } = *alarm;

        let active = self.active.as_mut()?;
        if active.id != timer || active.remaining.checked_sub(1) != Some(remaining) {
            return None;
        }
        active.remaining = remaining;
        let kind = active.kind;

        if remaining == 0 {
            self.active = None;
            return Some(TimerEvent::Expired { kind });
        }

        schedule_message(
            AlarmMessage::Tick {
                timer,
                kind,
                remaining: remaining - 1,
            },
            active.tick,
        );

        Some(TimerEvent::Tick { kind, remaining })
    }
}
