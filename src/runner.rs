//! Async driver for a single session
//!
//! [`spawn`] moves a [`Game`] onto its own tokio task and hands back a
//! [`SessionHandle`]. Every connection event, client action and timer alarm
//! reaches the game through that task's channels, so the game processes
//! them one at a time in arrival order. Timer alarms are delivered by short
//! sleeping tasks that post back into the session once their delay elapses.
//!
//! Sessions spawned this way share nothing; each owns its registry, ledger,
//! scheduler and question source.

use std::{collections::HashMap, time::Duration};

use log::{debug, info};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    AlarmMessage,
    config::Options,
    game::{self, Game, IncomingMessage, Phase},
    ledger::Summary,
    question::QuestionSource,
    registry::{self, Id},
    session::Tunnel,
    session_id::SessionId,
};

/// Errors returned by a [`SessionHandle`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session task is no longer running
    #[error("session has shut down")]
    Closed,
}

/// Inputs of the session task
enum Command<T> {
    Connect { id: Id, tunnel: T },
    Disconnect(Id),
    Message { id: Id, message: IncomingMessage },
    Text { id: Id, text: String },
    Start,
    Phase(oneshot::Sender<Phase>),
    Scores(oneshot::Sender<Vec<(Id, u64)>>),
    Summary(oneshot::Sender<Summary>),
    Shutdown,
}

/// Handle to a running session
///
/// Dropping every handle stops the session.
#[derive(Debug)]
pub struct SessionHandle<T> {
    id: SessionId,
    sender: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

/// Starts a session on the current tokio runtime
pub fn spawn<T>(options: Options, source: impl QuestionSource + Send + 'static) -> SessionHandle<T>
where
    T: Tunnel + Clone + Send + 'static,
{
    let id = SessionId::new();
    let (sender, commands) = mpsc::unbounded_channel();
    let (alarm_sender, alarms) = mpsc::unbounded_channel();

    let actor = Actor {
        session: id,
        game: Game::new(options, source),
        tunnels: HashMap::new(),
        alarm_sender,
    };
    let task = tokio::spawn(actor.run(commands, alarms));

    SessionHandle { id, sender, task }
}

impl<T> SessionHandle<T> {
    /// The session's id
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn send_command(&self, command: Command<T>) -> Result<(), Error> {
        self.sender.send(command).map_err(|_| Error::Closed)
    }

    /// Attaches a connection with the tunnel used to reach it
    ///
    /// Attaching an id that is already present swaps in the new tunnel,
    /// closes the old one and resends the current state; the player keeps
    /// its name, answers and score.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub fn connect(&self, id: Id, tunnel: T) -> Result<(), Error> {
        self.send_command(Command::Connect { id, tunnel })
    }

    /// Reports that a connection's transport went away
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub fn disconnect(&self, id: Id) -> Result<(), Error> {
        self.send_command(Command::Disconnect(id))
    }

    /// Delivers a parsed client action
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub fn send(&self, id: Id, message: IncomingMessage) -> Result<(), Error> {
        self.send_command(Command::Message { id, message })
    }

    /// Delivers a raw client frame; malformed frames are dropped by the session
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub fn send_text(&self, id: Id, text: impl Into<String>) -> Result<(), Error> {
        self.send_command(Command::Text {
            id,
            text: text.into(),
        })
    }

    /// Fires the external start signal
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub fn start(&self) -> Result<(), Error> {
        self.send_command(Command::Start)
    }

    /// The session's phase once every earlier command has been processed
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub async fn phase(&self) -> Result<Phase, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send_command(Command::Phase(sender))?;
        receiver.await.map_err(|_| Error::Closed)
    }

    /// The standings once every earlier command has been processed
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub async fn scores(&self) -> Result<Vec<(Id, u64)>, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send_command(Command::Scores(sender))?;
        receiver.await.map_err(|_| Error::Closed)
    }

    /// Standings and per-round tallies once every earlier command has been
    /// processed
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the session has shut down.
    pub async fn summary(&self) -> Result<Summary, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send_command(Command::Summary(sender))?;
        receiver.await.map_err(|_| Error::Closed)
    }

    /// Stops the session, closing every tunnel, and waits for it to finish
    pub async fn shutdown(self) {
        // the task may already be gone, in which case there is nothing to stop
        let _ = self.sender.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            debug!("session {} ended abnormally: {e}", self.id);
        }
    }
}

struct Actor<T> {
    session: SessionId,
    game: Game,
    tunnels: HashMap<Id, T>,
    alarm_sender: mpsc::UnboundedSender<AlarmMessage>,
}

impl<T: Tunnel + Clone + Send + 'static> Actor<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<T>>,
        mut alarms: mpsc::UnboundedReceiver<AlarmMessage>,
    ) {
        info!("session {} started", self.session);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(alarm) = alarms.recv() => {
                    self.alarm(alarm);
                }
            }
        }

        for (_, tunnel) in self.tunnels.drain() {
            tunnel.close();
        }
        info!("session {} stopped", self.session);
    }

    /// Applies one command, returning `false` once the session should stop
    fn handle(&mut self, command: Command<T>) -> bool {
        let mut scheduled = Vec::new();

        match command {
            Command::Connect { id, tunnel } => {
                if let Some(replaced) = self.tunnels.insert(id, tunnel) {
                    replaced.close();
                }
                match self.game.add_unassigned(
                    id,
                    |alarm, delay| scheduled.push((alarm, delay)),
                    |id| self.tunnels.get(&id).cloned(),
                ) {
                    Ok(()) => {}
                    Err(game::Error::Registry(registry::Error::AlreadyConnected)) => {
                        debug!("session {}: connection {id} reattached", self.session);
                        self.receive(id, IncomingMessage::GetQuestion, &mut scheduled);
                    }
                    Err(e) => {
                        debug!("session {}: refused connection {id}: {e}", self.session);
                        if let Some(tunnel) = self.tunnels.remove(&id) {
                            tunnel.close();
                        }
                    }
                }
            }
            Command::Disconnect(id) => {
                self.tunnels.remove(&id);
                self.game.remove_watcher(
                    id,
                    |alarm, delay| scheduled.push((alarm, delay)),
                    |id| self.tunnels.get(&id).cloned(),
                );
            }
            Command::Message { id, message } => {
                self.receive(id, message, &mut scheduled);
            }
            Command::Text { id, text } => match IncomingMessage::from_message(&text) {
                Some(message) => self.receive(id, message, &mut scheduled),
                None => debug!("session {}: dropped malformed frame from {id}", self.session),
            },
            Command::Start => {
                if let Err(e) = self.game.start(
                    |alarm, delay| scheduled.push((alarm, delay)),
                    |id| self.tunnels.get(&id).cloned(),
                ) {
                    debug!("session {}: start refused: {e}", self.session);
                }
            }
            Command::Phase(reply) => {
                let _ = reply.send(self.game.phase());
            }
            Command::Scores(reply) => {
                let _ = reply.send(self.game.ledger().scores_descending());
            }
            Command::Summary(reply) => {
                let _ = reply.send(self.game.ledger().summary());
            }
            Command::Shutdown => return false,
        }

        self.schedule(scheduled);
        true
    }

    fn receive(
        &mut self,
        id: Id,
        message: IncomingMessage,
        scheduled: &mut Vec<(AlarmMessage, Duration)>,
    ) {
        if let Err(e) = self.game.receive_message(
            id,
            message,
            |alarm, delay| scheduled.push((alarm, delay)),
            |id| self.tunnels.get(&id).cloned(),
        ) {
            debug!("session {}: dropped action from {id}: {e}", self.session);
        }
    }

    fn alarm(&mut self, alarm: AlarmMessage) {
        let mut scheduled = Vec::new();
        self.game.receive_alarm(
            alarm,
            |alarm, delay| scheduled.push((alarm, delay)),
            |id| self.tunnels.get(&id).cloned(),
        );
        self.schedule(scheduled);
    }

    fn schedule(&self, scheduled: Vec<(AlarmMessage, Duration)>) {
        for (alarm, delay) in scheduled {
            let sender = self.alarm_sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // the session may have stopped while we slept
                let _ = sender.send(alarm);
            });
        }
    }
}
