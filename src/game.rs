//! Core session logic and state management
//!
//! This module contains the main session struct: the round state machine and
//! the single state-transition function every inbound action, connection
//! event and timer alarm goes through. It owns the player registry, the
//! score ledger, the scheduler and the question source of one session, and
//! talks to clients only through the tunnels handed to it.

use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    AlarmMessage,
    config::Options,
    ledger::{ScoreLedger, ScoreMessage},
    names::{self, Names},
    question::QuestionSource,
    registry::{self, Id, PlayerMessage, Registry, ValueKind},
    round::{self, Round},
    scheduler::{Scheduler, TimerEvent, TimerKind},
    session::Tunnel,
};

/// Number of generated names tried before falling back to asking the player
const RANDOM_NAME_ATTEMPTS: usize = 100;

/// Represents the current state of the session
#[derive(Debug, Clone)]
pub enum State {
    /// No question is active; waiting for a player or a start signal
    AwaitingStart,
    /// A round is open for answers
    Round(Box<Round>),
    /// The last round was revealed and the countdown to the next one is running
    Advancing(Box<Round>),
}

/// The phase of the round lifecycle a session is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// No question is active
    AwaitingStart,
    /// Collecting answers
    Asking,
    /// Closing the round and disclosing the answer
    Revealing,
    /// Counting down to the next question
    Advancing,
}

/// Reasons an action is refused
///
/// None of these are fatal; the caller may log and drop them.
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The sender is not a player of this session
    #[error("sender is not a player in this session")]
    UnknownPlayer,
    /// The sender's connection is already gone
    #[error("sender's connection is gone")]
    TransportDisconnect,
    /// The round refused the answer
    #[error(transparent)]
    Round(#[from] round::Error),
    /// The registry refused the connection
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// The requested name was refused
    #[error(transparent)]
    Name(#[from] names::Error),
    /// The question source has nothing left to ask
    #[error("no question available")]
    NoQuestion,
}

/// Payload of `submitAnswer`
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SubmitAnswer {
    /// The chosen option, or `null` to pass
    pub answer: Option<String>,
    /// The round the answer is meant for, if the client tracks it
    #[serde(default)]
    pub round: Option<usize>,
}

/// Actions clients may send
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IncomingMessage {
    /// Join the session under a display name
    Join(String),
    /// Ask for a full snapshot of the session
    GetQuestion,
    /// Answer the current question
    SubmitAnswer(SubmitAnswer),
}

impl IncomingMessage {
    /// Parses a message from its JSON text
    pub fn from_message(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Whether a connection of the given kind may send this message
    fn follows(&self, sender_kind: ValueKind) -> bool {
        match self {
            IncomingMessage::Join(_) | IncomingMessage::GetQuestion => true,
            IncomingMessage::SubmitAnswer(_) => sender_kind == ValueKind::Player,
        }
    }
}

/// Session updates sent to clients
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMessage {
    /// Assign a unique ID to a connection
    IdAssign(Id),
    /// Prompt the connection to choose a name
    NameChoose,
    /// Confirm a name assignment
    NameAssign(String),
    /// Report an error with name validation
    NameError(names::Error),
    /// The current roster
    Players(Vec<PlayerMessage>),
    /// Every player's total
    Scores(BTreeMap<Id, u64>),
    /// Ticks until the next question, `None` once the countdown is over
    Countdown(Option<u64>),
}

/// Session state sent to a single client on request
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum SyncMessage {
    /// Who the requester is within the session
    Metainfo {
        /// The requester's id
        id: Id,
        /// The requester's name, once joined
        name: Option<String>,
        /// The requester's total and standing, once joined
        score: Option<ScoreMessage>,
        /// Points the requester earned in each round so far
        history: Vec<u64>,
    },
    /// No question is active
    AwaitingStart {
        /// Rounds played so far
        rounds_played: usize,
    },
}

/// A single trivia session
pub struct Game {
    /// Tunable behaviour
    options: Options,
    /// Every connection attached to the session
    registry: Registry,
    /// Display names of joined players
    names: Names,
    /// Cumulative scores
    ledger: ScoreLedger,
    /// The session clock
    scheduler: Scheduler,
    /// Where in the round lifecycle the session is
    state: State,
    /// Supplies the question for each new round
    source: Box<dyn QuestionSource + Send>,
    /// Rounds started so far, used as the next round's index
    rounds_played: usize,
}

impl Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("options", &self.options)
            .field("state", &self.state)
            .field("rounds_played", &self.rounds_played)
            .finish_non_exhaustive()
    }
}

// Accessors
impl Game {
    /// Creates an idle session
    pub fn new(options: Options, source: impl QuestionSource + Send + 'static) -> Self {
        Self {
            options,
            registry: Registry::default(),
            names: Names::default(),
            ledger: ScoreLedger::default(),
            scheduler: Scheduler::default(),
            state: State::AwaitingStart,
            source: Box::new(source),
            rounds_played: 0,
        }
    }

    /// The session's options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The current state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The phase of the round lifecycle
    pub fn phase(&self) -> Phase {
        match &self.state {
            State::AwaitingStart => Phase::AwaitingStart,
            State::Round(round) if round.is_revealed() => Phase::Revealing,
            State::Round(_) => Phase::Asking,
            State::Advancing(_) => Phase::Advancing,
        }
    }

    /// The open or most recently revealed round
    pub fn current_round(&self) -> Option<&Round> {
        match &self.state {
            State::AwaitingStart => None,
            State::Round(round) | State::Advancing(round) => Some(round),
        }
    }

    /// The player registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The score ledger
    pub fn ledger(&self) -> &ScoreLedger {
        &self.ledger
    }

    /// Rounds started so far
    pub fn rounds_played(&self) -> usize {
        self.rounds_played
    }

    fn announce_players<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.registry.announce(
            &UpdateMessage::Players(self.registry.roster(&tunnel_finder)).into(),
            &tunnel_finder,
        );
    }

    fn announce_scores<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.registry.announce(
            &UpdateMessage::Scores(self.ledger.scores().clone()).into(),
            tunnel_finder,
        );
    }
}

// Round lifecycle
impl Game {
    /// Starts the first round if the session is waiting for one
    ///
    /// Does nothing outside of `AwaitingStart`, and stays there while no
    /// player is connected.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoQuestion` if the question source is exhausted.
    pub fn start<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if !matches!(self.state, State::AwaitingStart) {
            debug!("ignoring start, a round is already under way");
            return Ok(());
        }

        self.start_round(schedule_message, tunnel_finder)
    }

    /// Issues the next question and starts the round timer
    fn start_round<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if self.registry.connected_players(&tunnel_finder).is_empty() {
            debug!("no players connected, waiting for a start");
            self.state = State::AwaitingStart;
            return Ok(());
        }

        let Some(question) = self.source.next_question() else {
            warn!("question source is exhausted after {} rounds", self.rounds_played);
            self.state = State::AwaitingStart;
            return Err(Error::NoQuestion);
        };

        let round = Round::new(self.rounds_played, question);
        self.rounds_played += 1;

        self.scheduler.start(
            TimerKind::Round,
            self.options.round_duration(),
            self.options.tick(),
            schedule_message,
        );

        info!(
            "round {} started: {:?}",
            round.index(),
            round.question().text()
        );
        self.registry.announce(
            &round
                .question_message(
                    self.options.reveal_answer_on_issue(),
                    self.options.round_time(),
                )
                .into(),
            &tunnel_finder,
        );

        self.state = State::Round(Box::new(round));

        Ok(())
    }

    /// Closes the open round, scores it and moves on
    ///
    /// Reveals at most once per round: whichever of "everyone answered" and
    /// "time is up" gets here first wins and the other becomes a no-op.
    fn close_round<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let players = self.registry.connected_players(&tunnel_finder);

        let State::Round(round) = &mut self.state else {
            return;
        };
        if !round.reveal(&players) {
            return;
        }
        self.scheduler.cancel();

        self.ledger = self.ledger.apply_round_result(round);

        info!(
            "round {} revealed, {} answers on record",
            round.index(),
            round.answers().len()
        );
        self.registry
            .announce(&round.reveal_message().into(), &tunnel_finder);
        self.announce_scores(&tunnel_finder);

        self.advance(schedule_message, tunnel_finder);
    }

    /// Starts the countdown to the next question, or parks the session if
    /// nobody is left to ask
    fn advance<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let previous = std::mem::replace(&mut self.state, State::AwaitingStart);

        if self.registry.connected_players(&tunnel_finder).is_empty() {
            info!("no players left, waiting for a start");
            return;
        }
        let State::Round(round) = previous else {
            return;
        };
        self.state = State::Advancing(round);

        self.scheduler.start(
            TimerKind::Countdown,
            self.options.countdown(),
            self.options.tick(),
            schedule_message,
        );
        self.registry.announce(
            &UpdateMessage::Countdown(Some(self.options.countdown())).into(),
            tunnel_finder,
        );
    }

    /// Records an answer for the open round
    fn submit_answer<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        submission: SubmitAnswer,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let State::Round(round) = &mut self.state else {
            return Err(round::Error::StaleRound.into());
        };
        if submission.round.is_some_and(|tag| tag != round.index()) {
            return Err(round::Error::StaleRound.into());
        }

        let answer = round.submit(watcher_id, submission.answer.as_deref())?;

        self.registry.announce(
            &round
                .answer_message(watcher_id, self.registry.get_name(watcher_id), answer)
                .into(),
            &tunnel_finder,
        );

        if round.all_answered(&self.registry.connected_players(&tunnel_finder)) {
            self.close_round(schedule_message, tunnel_finder);
        }

        Ok(())
    }

    /// Handles a timer alarm that came due
    ///
    /// Alarms of superseded or cancelled timers are dropped.
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        message: AlarmMessage,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        let Some(event) = self.scheduler.fire(&message, &mut schedule_message) else {
            debug!("ignoring stale alarm {message:?}");
            return;
        };

        match event {
            TimerEvent::Tick {
                kind: TimerKind::Round,
                remaining,
            } => {
                self.registry.announce(
                    &round::UpdateMessage::TimeRemaining(remaining).into(),
                    tunnel_finder,
                );
            }
            TimerEvent::Expired {
                kind: TimerKind::Round,
            } => {
                self.registry.announce(
                    &round::UpdateMessage::TimeRemaining(0).into(),
                    &tunnel_finder,
                );
                self.close_round(schedule_message, tunnel_finder);
            }
            TimerEvent::Tick {
                kind: TimerKind::Countdown,
                remaining,
            } => {
                self.registry.announce(
                    &UpdateMessage::Countdown(Some(remaining)).into(),
                    tunnel_finder,
                );
            }
            TimerEvent::Expired {
                kind: TimerKind::Countdown,
            } => {
                self.registry
                    .announce(&UpdateMessage::Countdown(None).into(), &tunnel_finder);
                if matches!(self.state, State::Advancing(_)) {
                    if let Err(e) = self.start_round(schedule_message, tunnel_finder) {
                        debug!("could not start the next round: {e}");
                    }
                }
            }
        }
    }
}

// Network
impl Game {
    /// Adds a new, not yet joined, connection
    ///
    /// The connection is told its id and asked for a name, or given a
    /// generated one when random names are enabled.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registry` if the session is full or the id is already
    /// attached; an attached id keeps its entry as is.
    pub fn add_unassigned<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher: Id,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        self.registry.add_connection(watcher)?;
        debug!("connection {watcher} attached");

        self.registry
            .send_message(&UpdateMessage::IdAssign(watcher).into(), watcher, &tunnel_finder);
        self.handle_unassigned(watcher, schedule_message, tunnel_finder);

        Ok(())
    }

    /// Either generates a name for a connection or asks it to pick one
    fn handle_unassigned<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if let Some(name_style) = self.options.random_names() {
            for _ in 0..RANDOM_NAME_ATTEMPTS {
                let name = name_style.generate();
                if self
                    .assign_player_name(watcher, &name, &mut schedule_message, &tunnel_finder)
                    .is_ok()
                {
                    return;
                }
            }
        }

        self.registry
            .send_message(&UpdateMessage::NameChoose.into(), watcher, tunnel_finder);
    }

    /// Turns a connection into a player under the given name
    ///
    /// Starts the session if it was waiting and auto start is enabled.
    fn assign_player_name<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher: Id,
        name: &str,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), names::Error> {
        let name = self.names.set_name(watcher, name)?;

        self.registry.join(watcher, name.clone());
        self.ledger.enroll(watcher);
        info!("{name} joined as {watcher}");

        self.registry.send_message(
            &UpdateMessage::NameAssign(name).into(),
            watcher,
            &tunnel_finder,
        );
        self.announce_players(&tunnel_finder);
        self.announce_scores(&tunnel_finder);
        self.send_sync(watcher, &tunnel_finder);

        if matches!(self.state, State::AwaitingStart) && self.options.auto_start() {
            if let Err(e) = self.start_round(schedule_message, &tunnel_finder) {
                debug!("join did not start a round: {e}");
            }
        }

        Ok(())
    }

    /// Handles an action sent by a client
    ///
    /// # Errors
    ///
    /// * `Error::UnknownPlayer` - The sender is not registered, or may not send this action
    /// * `Error::TransportDisconnect` - The sender's tunnel is already gone
    /// * `Error::Name` - The requested name was refused; the sender was told why
    /// * `Error::Round` - The answer was refused
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let Some(watcher_value) = self.registry.get(watcher_id) else {
            return Err(Error::UnknownPlayer);
        };
        if tunnel_finder(watcher_id).is_none() {
            return Err(Error::TransportDisconnect);
        }
        if !message.follows(watcher_value.kind()) {
            return Err(Error::UnknownPlayer);
        }

        match message {
            IncomingMessage::Join(name) => {
                if let Err(e) =
                    self.assign_player_name(watcher_id, &name, schedule_message, &tunnel_finder)
                {
                    self.registry.send_message(
                        &UpdateMessage::NameError(e).into(),
                        watcher_id,
                        tunnel_finder,
                    );
                    return Err(e.into());
                }
                Ok(())
            }
            IncomingMessage::GetQuestion => {
                self.send_sync(watcher_id, tunnel_finder);
                Ok(())
            }
            IncomingMessage::SubmitAnswer(submission) => {
                self.submit_answer(watcher_id, submission, schedule_message, tunnel_finder)
            }
        }
    }

    /// Removes a connection whose transport went away
    ///
    /// Answers it already gave stay on record. If it was the last player
    /// still owing an answer, the round closes.
    pub fn remove_watcher<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let Some(value) = self.registry.leave(watcher_id) else {
            return;
        };
        self.names.release(&watcher_id);

        if value.kind() != ValueKind::Player {
            debug!("connection {watcher_id} detached before joining");
            return;
        }
        info!("player {watcher_id} left");
        self.announce_players(&tunnel_finder);

        let all_answered = match &self.state {
            State::Round(round) => {
                round.all_answered(&self.registry.connected_players(&tunnel_finder))
            }
            State::AwaitingStart | State::Advancing(_) => false,
        };
        if all_answered {
            self.close_round(schedule_message, tunnel_finder);
        }
    }

    /// Returns the snapshot of the current phase as seen by one client
    pub fn state_message(&self, watcher_id: Id) -> super::SyncMessage {
        match &self.state {
            State::AwaitingStart => SyncMessage::AwaitingStart {
                rounds_played: self.rounds_played,
            }
            .into(),
            State::Round(round) | State::Advancing(round) => round
                .state_message(
                    watcher_id,
                    self.options.reveal_answer_on_issue(),
                    self.round_time_left(),
                )
                .into(),
        }
    }

    /// Time left on the round timer, in whole ticks of the session clock
    fn round_time_left(&self) -> Duration {
        match (self.scheduler.active_kind(), self.scheduler.remaining()) {
            (Some(TimerKind::Round), Some(ticks)) => self
                .options
                .tick()
                .saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX)),
            _ => Duration::ZERO,
        }
    }

    /// Brings one client fully up to date
    ///
    /// Sent on join and on `getQuestion`: identity, roster, scores, the
    /// current phase and, while advancing, the countdown.
    fn send_sync<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, watcher_id: Id, tunnel_finder: F) {
        self.registry.send_state(
            &SyncMessage::Metainfo {
                id: watcher_id,
                name: self.registry.get_name(watcher_id),
                score: self.ledger.score(watcher_id),
                history: self.ledger.player_summary(watcher_id),
            }
            .into(),
            watcher_id,
            &tunnel_finder,
        );
        self.registry.send_message(
            &UpdateMessage::Players(self.registry.roster(&tunnel_finder)).into(),
            watcher_id,
            &tunnel_finder,
        );
        self.registry.send_message(
            &UpdateMessage::Scores(self.ledger.scores().clone()).into(),
            watcher_id,
            &tunnel_finder,
        );
        self.registry
            .send_state(&self.state_message(watcher_id), watcher_id, &tunnel_finder);

        if matches!(self.state, State::Advancing(_)) {
            self.registry.send_message(
                &UpdateMessage::Countdown(self.scheduler.remaining()).into(),
                watcher_id,
                tunnel_finder,
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use serde_json::Value;

    use super::*;
    use crate::{
        names::NameStyle,
        question::{Deck, Question},
        round::Answer,
    };

    #[derive(Clone, Default)]
    struct MockTunnel {
        updates: Arc<Mutex<Vec<crate::UpdateMessage>>>,
        states: Arc<Mutex<Vec<crate::SyncMessage>>>,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.updates.lock().unwrap().push(message.clone());
        }

        fn send_state(&self, state: &crate::SyncMessage) {
            self.states.lock().unwrap().push(state.clone());
        }

        fn close(self) {}
    }

    impl MockTunnel {
        fn updates(&self) -> Vec<Value> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|m| serde_json::to_value(m).unwrap())
                .collect()
        }

        fn states(&self) -> Vec<Value> {
            self.states
                .lock()
                .unwrap()
                .iter()
                .map(|m| serde_json::to_value(m).unwrap())
                .collect()
        }

        fn events(&self, name: &str) -> Vec<Value> {
            self.updates()
                .into_iter()
                .filter_map(|m| m.get(name).cloned())
                .collect()
        }
    }

    /// A session wired to mock tunnels and a manual clock
    struct Harness {
        game: Game,
        tunnels: HashMap<Id, MockTunnel>,
        alarms: Vec<AlarmMessage>,
    }

    fn abc() -> Question {
        Question::new(
            "Pick B",
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            "B",
        )
    }

    impl Harness {
        fn new(options: Options) -> Self {
            Self::with_source(options, Deck::new(vec![abc()]).unwrap())
        }

        fn with_source(options: Options, source: impl QuestionSource + Send + 'static) -> Self {
            Self {
                game: Game::new(options, source),
                tunnels: HashMap::new(),
                alarms: Vec::new(),
            }
        }

        fn connect(&mut self) -> Id {
            let id = Id::new();
            self.tunnels.insert(id, MockTunnel::default());
            self.game
                .add_unassigned(
                    id,
                    |alarm, _| self.alarms.push(alarm),
                    |id| self.tunnels.get(&id).cloned(),
                )
                .unwrap();
            id
        }

        /// Registers an id that is already attached, as a reconnecting client would
        fn reconnect(&mut self, id: Id) -> Result<(), Error> {
            self.game.add_unassigned(
                id,
                |alarm, _| self.alarms.push(alarm),
                |id| self.tunnels.get(&id).cloned(),
            )
        }

        fn send(&mut self, id: Id, message: IncomingMessage) -> Result<(), Error> {
            self.game.receive_message(
                id,
                message,
                |alarm, _| self.alarms.push(alarm),
                |id| self.tunnels.get(&id).cloned(),
            )
        }

        fn join(&mut self, name: &str) -> Id {
            let id = self.connect();
            self.send(id, IncomingMessage::Join(name.to_string()))
                .unwrap();
            id
        }

        fn answer(&mut self, id: Id, answer: Option<&str>) -> Result<(), Error> {
            self.send(
                id,
                IncomingMessage::SubmitAnswer(SubmitAnswer {
                    answer: answer.map(str::to_string),
                    round: None,
                }),
            )
        }

        fn start(&mut self) -> Result<(), Error> {
            self.game.start(
                |alarm, _| self.alarms.push(alarm),
                |id| self.tunnels.get(&id).cloned(),
            )
        }

        fn disconnect(&mut self, id: Id) {
            self.tunnels.remove(&id);
            self.game.remove_watcher(
                id,
                |alarm, _| self.alarms.push(alarm),
                |id| self.tunnels.get(&id).cloned(),
            );
        }

        /// Delivers every alarm currently due, in order
        fn tick(&mut self) {
            for alarm in std::mem::take(&mut self.alarms) {
                self.game.receive_alarm(
                    alarm,
                    |alarm, _| self.alarms.push(alarm),
                    |id| self.tunnels.get(&id).cloned(),
                );
            }
        }

        fn ticks(&mut self, count: usize) {
            for _ in 0..count {
                self.tick();
            }
        }

        fn tunnel(&self, id: Id) -> &MockTunnel {
            &self.tunnels[&id]
        }
    }

    fn manual_start() -> Options {
        Options::default().with_auto_start(false)
    }

    #[test]
    fn test_two_players_all_answered_closes_round() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let bob = harness.join("Bob");
        assert_eq!(harness.game.phase(), Phase::AwaitingStart);

        harness.start().unwrap();
        assert_eq!(harness.game.phase(), Phase::Asking);

        harness.answer(ann, Some("B")).unwrap();
        assert_eq!(harness.game.phase(), Phase::Asking);
        harness.answer(bob, Some("C")).unwrap();
        assert_eq!(harness.game.phase(), Phase::Advancing);

        let ledger = harness.game.ledger();
        assert_eq!(ledger.points(ann), Some(1));
        assert_eq!(ledger.points(bob), Some(0));

        let reveals = harness.tunnel(bob).events("showCorrectAnswer");
        assert_eq!(reveals.len(), 1);
        assert_eq!(reveals[0]["answer"], "B");

        let scores = harness.tunnel(ann).events("scores");
        let last = scores.last().unwrap();
        assert_eq!(last[ann.to_string()], 1);
        assert_eq!(last[bob.to_string()], 0);
    }

    #[test]
    fn test_silent_player_times_out_with_no_answer() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");
        assert_eq!(harness.game.phase(), Phase::Asking);

        harness.ticks(14);
        assert_eq!(harness.game.phase(), Phase::Asking);
        assert_eq!(harness.tunnel(ann).events("timeRemaining").len(), 14);

        harness.tick();
        assert_eq!(harness.game.phase(), Phase::Advancing);
        assert_eq!(
            harness.game.current_round().unwrap().answer(ann),
            Some(Answer::NoAnswer)
        );
        assert_eq!(harness.game.ledger().points(ann), Some(0));
        assert_eq!(harness.tunnel(ann).events("showCorrectAnswer").len(), 1);
    }

    #[test]
    fn test_departed_player_answer_still_counts() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let bob = harness.join("Bob");
        harness.start().unwrap();

        harness.answer(ann, Some("B")).unwrap();
        harness.disconnect(ann);
        assert!(!harness.game.registry().contains(ann));
        assert_eq!(harness.game.phase(), Phase::Asking);

        harness.answer(bob, Some("A")).unwrap();
        assert_eq!(harness.game.phase(), Phase::Advancing);
        assert_eq!(harness.game.ledger().points(ann), Some(1));
        assert_eq!(harness.game.ledger().points(bob), Some(0));
    }

    #[test]
    fn test_leaving_last_unanswered_player_closes_round() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let bob = harness.join("Bob");
        harness.start().unwrap();

        harness.answer(ann, Some("B")).unwrap();
        harness.disconnect(bob);

        assert_eq!(harness.game.phase(), Phase::Advancing);
        assert_eq!(harness.game.ledger().points(ann), Some(1));
    }

    #[test]
    fn test_duplicate_submission_first_answer_stands() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let _bob = harness.join("Bob");
        harness.start().unwrap();

        harness.answer(ann, Some("C")).unwrap();
        assert_eq!(
            harness.answer(ann, Some("B")),
            Err(Error::Round(round::Error::DuplicateSubmission))
        );

        let round = harness.game.current_round().unwrap();
        assert_eq!(round.answers().len(), 1);
        assert_eq!(round.answer(ann).and_then(|a| a.option()), Some(2));
        assert_eq!(harness.tunnel(ann).events("answerSubmitted").len(), 1);
    }

    #[test]
    fn test_answer_after_reveal_is_stale() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");
        harness.answer(ann, Some("B")).unwrap();
        assert_eq!(harness.game.phase(), Phase::Advancing);
        let before = harness.game.ledger().clone();

        assert_eq!(
            harness.answer(ann, Some("B")),
            Err(Error::Round(round::Error::StaleRound))
        );
        assert_eq!(harness.game.ledger(), &before);
        assert_eq!(harness.game.current_round().unwrap().answers().len(), 1);
    }

    #[test]
    fn test_reveal_fires_once_when_timer_races_all_answered() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");

        // keep the round timer's pending alarm and replay it after the reveal
        let pending = harness.alarms.clone();
        harness.answer(ann, Some("B")).unwrap();
        for alarm in pending {
            harness.game.receive_alarm(
                alarm,
                |alarm, _| harness.alarms.push(alarm),
                |id| harness.tunnels.get(&id).cloned(),
            );
        }

        assert_eq!(harness.tunnel(ann).events("showCorrectAnswer").len(), 1);
        assert_eq!(harness.game.ledger().points(ann), Some(1));
        assert_eq!(harness.game.ledger().round_count(), 1);
    }

    #[test]
    fn test_countdown_then_next_question() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");
        harness.answer(ann, Some("B")).unwrap();

        harness.ticks(3);

        let countdown = harness.tunnel(ann).events("countdown");
        assert_eq!(
            countdown,
            vec![
                Value::from(3),
                Value::from(2),
                Value::from(1),
                Value::Null
            ]
        );
        assert_eq!(harness.game.phase(), Phase::Asking);
        assert_eq!(harness.game.current_round().unwrap().index(), 1);

        let questions = harness.tunnel(ann).events("newQuestion");
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[1]["round"], 1);
    }

    #[test]
    fn test_empty_registry_suspends_at_awaiting_start() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");
        assert_eq!(harness.game.phase(), Phase::Asking);

        harness.disconnect(ann);
        assert_eq!(harness.game.phase(), Phase::AwaitingStart);
        assert_eq!(harness.game.ledger().round_count(), 1);

        // the round timer was cancelled and nothing else was scheduled
        harness.ticks(20);
        assert_eq!(harness.game.phase(), Phase::AwaitingStart);
        assert_eq!(harness.game.rounds_played(), 1);
    }

    #[test]
    fn test_start_without_players_stays_idle() {
        let mut harness = Harness::new(manual_start());
        let _lurker = harness.connect();

        harness.start().unwrap();
        assert_eq!(harness.game.phase(), Phase::AwaitingStart);
        assert_eq!(harness.game.rounds_played(), 0);
    }

    #[test]
    fn test_exhausted_source_parks_session() {
        let mut questions = vec![abc()];
        let mut harness = Harness::with_source(Options::default(), move || questions.pop());
        let ann = harness.join("Ann");
        harness.answer(ann, Some("B")).unwrap();

        harness.ticks(3);
        assert_eq!(harness.game.phase(), Phase::AwaitingStart);
        assert_eq!(harness.start(), Err(Error::NoQuestion));
    }

    #[test]
    fn test_unknown_and_unassigned_senders_are_rejected() {
        let mut harness = Harness::new(manual_start());
        let _ann = harness.join("Ann");
        harness.start().unwrap();

        let stranger = Id::new();
        assert_eq!(harness.answer(stranger, Some("B")), Err(Error::UnknownPlayer));

        let lurker = harness.connect();
        assert_eq!(harness.answer(lurker, Some("B")), Err(Error::UnknownPlayer));
        assert!(harness.game.current_round().unwrap().answers().is_empty());
    }

    #[test]
    fn test_round_tag_mismatch_is_stale() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        harness.start().unwrap();

        assert_eq!(
            harness.send(
                ann,
                IncomingMessage::SubmitAnswer(SubmitAnswer {
                    answer: Some("B".to_string()),
                    round: Some(7),
                }),
            ),
            Err(Error::Round(round::Error::StaleRound))
        );
        assert!(
            harness
                .send(
                    ann,
                    IncomingMessage::SubmitAnswer(SubmitAnswer {
                        answer: Some("B".to_string()),
                        round: Some(0),
                    }),
                )
                .is_ok()
        );
    }

    #[test]
    fn test_answer_is_withheld_until_reveal() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");

        let questions = harness.tunnel(ann).events("newQuestion");
        assert_eq!(questions[0]["options"], serde_json::json!(["A", "B", "C"]));
        assert!(questions[0].get("answer").is_none());

        let mut legacy = Harness::new(Options::default().with_reveal_answer_on_issue(true));
        let bob = legacy.join("Bob");
        assert_eq!(legacy.tunnel(bob).events("newQuestion")[0]["answer"], "B");
    }

    #[test]
    fn test_answer_broadcast_reaches_everyone_without_correctness() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let bob = harness.join("Bob");
        harness.start().unwrap();

        harness.answer(ann, Some("A")).unwrap();
        let seen = harness.tunnel(bob).events("answerSubmitted");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["player"], ann.to_string());
        assert_eq!(seen[0]["name"], "Ann");
        assert_eq!(seen[0]["answer"], "A");
        assert!(seen[0].get("correct").is_none());
    }

    #[test]
    fn test_late_joiner_gets_snapshot() {
        let mut harness = Harness::new(Options::default());
        let _ann = harness.join("Ann");
        let bob = harness.join("Bob");

        harness.send(bob, IncomingMessage::GetQuestion).unwrap();
        let states = harness.tunnel(bob).states();
        let last = states.last().unwrap();
        assert_eq!(last["asking"]["question"], "Pick B");
        assert_eq!(last["asking"]["answered"], serde_json::json!([]));

        let metainfo = states.iter().rev().find_map(|s| s.get("metainfo")).unwrap();
        assert_eq!(metainfo["name"], "Bob");
        assert_eq!(metainfo["score"]["points"], 0);
        assert_eq!(metainfo["history"], serde_json::json!([]));
    }

    #[test]
    fn test_pass_counts_as_an_answer() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");

        harness.answer(ann, None).unwrap();
        assert_eq!(harness.game.phase(), Phase::Advancing);
        assert_eq!(harness.game.ledger().points(ann), Some(0));
    }

    #[test]
    fn test_join_flow_and_name_errors() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.connect();

        let updates = harness.tunnel(ann).updates();
        assert_eq!(updates[0]["idAssign"], ann.to_string());
        assert_eq!(updates[1], Value::from("nameChoose"));

        harness
            .send(ann, IncomingMessage::Join("Ann".to_string()))
            .unwrap();
        assert_eq!(
            harness.tunnel(ann).events("nameAssign"),
            vec![Value::from("Ann")]
        );
        assert_eq!(
            harness.send(ann, IncomingMessage::Join("Again".to_string())),
            Err(Error::Name(names::Error::Assigned))
        );

        let bob = harness.connect();
        assert_eq!(
            harness.send(bob, IncomingMessage::Join("Ann".to_string())),
            Err(Error::Name(names::Error::Used))
        );
        assert_eq!(
            harness.tunnel(bob).events("nameError"),
            vec![Value::from("Used")]
        );

        let roster = harness.tunnel(ann).events("players");
        assert_eq!(roster.last().unwrap()[0]["name"], "Ann");
    }

    #[test]
    fn test_name_is_released_on_leave() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        harness.disconnect(ann);

        let again = harness.join("Ann");
        assert_eq!(harness.game.registry().get_name(again), Some("Ann".to_string()));
        assert_eq!(harness.game.ledger().points(again), Some(0));
    }

    #[test]
    fn test_random_names_join_on_connect() {
        let mut harness = Harness::new(
            manual_start().with_random_names(Some(NameStyle::Petname(2))),
        );
        let id = harness.connect();

        assert!(harness.game.registry().is_player(id));
        assert_eq!(harness.tunnel(id).events("nameAssign").len(), 1);
        assert!(harness.tunnel(id).events("nameChoose").is_empty());
    }

    #[test]
    fn test_incoming_message_wire_shape() {
        assert_eq!(
            IncomingMessage::from_message(r#"{"join": "Ann"}"#),
            Some(IncomingMessage::Join("Ann".to_string()))
        );
        assert_eq!(
            IncomingMessage::from_message(r#""getQuestion""#),
            Some(IncomingMessage::GetQuestion)
        );
        assert_eq!(
            IncomingMessage::from_message(r#"{"submitAnswer": {"answer": null}}"#),
            Some(IncomingMessage::SubmitAnswer(SubmitAnswer {
                answer: None,
                round: None
            }))
        );
        assert_eq!(
            IncomingMessage::from_message(r#"{"submitAnswer": {"answer": "B", "round": 2}}"#),
            Some(IncomingMessage::SubmitAnswer(SubmitAnswer {
                answer: Some("B".to_string()),
                round: Some(2)
            }))
        );
        assert_eq!(IncomingMessage::from_message("{\"shout\": 1}"), None);
        assert_eq!(IncomingMessage::from_message("not json"), None);
    }

    #[test]
    fn test_players_event_is_a_plain_list() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let _bob = harness.join("Bob");

        let roster = harness.tunnel(ann).events("players");
        let latest = roster.last().unwrap().as_array().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0]["id"], ann.to_string());
        assert_eq!(latest[0]["name"], "Ann");
        assert_eq!(latest[1]["name"], "Bob");
    }

    #[test]
    fn test_reattaching_an_id_keeps_the_player() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        harness.start().unwrap();

        assert_eq!(
            harness.reconnect(ann),
            Err(Error::Registry(registry::Error::AlreadyConnected))
        );
        assert!(harness.game.registry().is_player(ann));
        assert_eq!(harness.game.registry().get_name(ann), Some("Ann".to_string()));

        harness.answer(ann, Some("B")).unwrap();
        assert_eq!(harness.game.ledger().points(ann), Some(1));
        assert_eq!(
            harness.send(ann, IncomingMessage::Join("Ann".to_string())),
            Err(Error::Name(names::Error::Assigned))
        );
    }

    #[test]
    fn test_snapshot_time_left_follows_session_clock() {
        let mut harness = Harness::new(Options::default());
        let ann = harness.join("Ann");

        harness.ticks(10);
        harness.send(ann, IncomingMessage::GetQuestion).unwrap();
        let states = harness.tunnel(ann).states();
        assert_eq!(states.last().unwrap()["asking"]["duration"], 5_000);

        harness.ticks(4);
        harness.send(ann, IncomingMessage::GetQuestion).unwrap();
        let states = harness.tunnel(ann).states();
        assert_eq!(states.last().unwrap()["asking"]["duration"], 1_000);
    }

    #[test]
    fn test_metainfo_carries_standing_and_history() {
        let mut harness = Harness::new(manual_start());
        let ann = harness.join("Ann");
        let bob = harness.join("Bob");
        harness.start().unwrap();
        harness.answer(ann, Some("C")).unwrap();
        harness.answer(bob, Some("B")).unwrap();

        harness.send(ann, IncomingMessage::GetQuestion).unwrap();
        let states = harness.tunnel(ann).states();
        let metainfo = states.iter().rev().find_map(|s| s.get("metainfo")).unwrap();
        assert_eq!(metainfo["score"]["points"], 0);
        assert_eq!(metainfo["score"]["position"], 1);
        assert_eq!(metainfo["history"], serde_json::json!([0]));
    }
}
