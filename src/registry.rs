//! Player registry
//!
//! Tracks every connection attached to a session. A connection starts out
//! unassigned and becomes a player once it joins under a display name. The
//! registry remembers join order so rosters are stable, and offers the
//! broadcast helpers the session uses to reach connected clients through
//! their tunnels.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{SyncMessage, UpdateMessage, session::Tunnel};

/// A unique identifier for a connection, stable for the connection's lifetime
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// What a connection currently is within the session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Connected but has not joined yet
    Unassigned,
    /// Joined the session under a display name
    Player(PlayerValue),
}

/// The discriminant of [`Value`], used to index connections by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum ValueKind {
    /// An unassigned connection
    Unassigned,
    /// A joined player
    Player,
}

impl Value {
    /// Returns the kind of this value without the associated data
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unassigned => ValueKind::Unassigned,
            Value::Player(_) => ValueKind::Player,
        }
    }
}

/// Data kept for a joined player
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerValue {
    /// The player's display name
    pub name: String,
    /// Join sequence number, used to order rosters
    pub joined: u64,
}

/// A roster entry as sent to clients in `players`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerMessage {
    /// The player's id
    pub id: Id,
    /// The player's display name
    pub name: String,
    /// Whether the player's tunnel is currently alive
    pub connected: bool,
}

/// Errors that can occur when managing the registry
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session has reached the maximum number of allowed connections
    #[error("maximum number of players reached")]
    MaximumPlayers,
    /// The id is already attached to this session
    #[error("connection is already attached")]
    AlreadyConnected,
}

/// Every connection attached to one session
#[derive(Debug, Default)]
pub struct Registry {
    /// Primary mapping from connection id to its value
    mapping: HashMap<Id, Value>,
    /// Reverse mapping organized by connection kind
    reverse_mapping: EnumMap<ValueKind, HashSet<Id>>,
    /// Next join sequence number
    next_join: u64,
}

impl Registry {
    /// Registers a new, not yet joined, connection
    ///
    /// # Errors
    ///
    /// * `Error::AlreadyConnected` - The id is registered already; its entry is left as is
    /// * `Error::MaximumPlayers` - The session is full
    pub fn add_connection(&mut self, id: Id) -> Result<(), Error> {
        if self.mapping.contains_key(&id) {
            return Err(Error::AlreadyConnected);
        }
        if self.mapping.len() >= crate::constants::registry::MAX_PLAYER_COUNT {
            return Err(Error::MaximumPlayers);
        }

        self.mapping.insert(id, Value::Unassigned);
        self.reverse_mapping[ValueKind::Unassigned].insert(id);

        Ok(())
    }

    /// Promotes a connection to a player under the given name
    ///
    /// Does nothing for ids that are not registered.
    pub fn join(&mut self, id: Id, name: String) {
        let Some(value) = self.mapping.get_mut(&id) else {
            return;
        };
        let old_kind = value.kind();
        *value = Value::Player(PlayerValue {
            name,
            joined: self.next_join,
        });
        self.next_join += 1;

        self.reverse_mapping[old_kind].remove(&id);
        self.reverse_mapping[ValueKind::Player].insert(id);
    }

    /// Removes a connection entirely, returning what it was
    pub fn leave(&mut self, id: Id) -> Option<Value> {
        let value = self.mapping.remove(&id)?;
        self.reverse_mapping[value.kind()].remove(&id);
        Some(value)
    }

    /// Gets the value of a connection
    pub fn get(&self, id: Id) -> Option<&Value> {
        self.mapping.get(&id)
    }

    /// Checks whether a connection is registered
    pub fn contains(&self, id: Id) -> bool {
        self.mapping.contains_key(&id)
    }

    /// Checks whether a connection has joined as a player
    pub fn is_player(&self, id: Id) -> bool {
        self.reverse_mapping[ValueKind::Player].contains(&id)
    }

    /// Gets the display name of a player
    pub fn get_name(&self, id: Id) -> Option<String> {
        match self.mapping.get(&id)? {
            Value::Player(player) => Some(player.name.clone()),
            Value::Unassigned => None,
        }
    }

    /// Number of connections of a specific kind
    pub fn specific_count(&self, filter: ValueKind) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Ids of all joined players whose tunnel is alive, in join order
    pub fn connected_players<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        tunnel_finder: F,
    ) -> Vec<Id> {
        self.players_in_order()
            .filter(|(id, _)| tunnel_finder(*id).is_some())
            .map(|(id, _)| id)
            .collect_vec()
    }

    /// All joined players in join order
    fn players_in_order(&self) -> impl Iterator<Item = (Id, &PlayerValue)> {
        self.reverse_mapping[ValueKind::Player]
            .iter()
            .filter_map(|id| match self.mapping.get(id) {
                Some(Value::Player(player)) => Some((*id, player)),
                _ => None,
            })
            .sorted_by_key(|(_, player)| player.joined)
    }

    /// The roster sent to clients in `players`, capped at the roster limit
    pub fn roster<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        tunnel_finder: F,
    ) -> Vec<PlayerMessage> {
        self.players_in_order()
            .take(crate::constants::registry::ROSTER_LIMIT)
            .map(|(id, player)| PlayerMessage {
                id,
                name: player.name.clone(),
                connected: tunnel_finder(id).is_some(),
            })
            .collect_vec()
    }

    /// Sends an update message to a specific connection
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific connection
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(id) else {
            return;
        };

        session.send_state(message);
    }

    /// Sends a possibly personalised message to every connection
    ///
    /// The sender is called once per live connection and may return `None`
    /// to skip it.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, ValueKind) -> Option<UpdateMessage>,
    {
        for (id, value) in &self.mapping {
            let Some(session) = tunnel_finder(*id) else {
                continue;
            };
            let Some(message) = sender(*id, value.kind()) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Broadcasts an update message to every live connection
    ///
    /// Unassigned connections are included so a client sitting on the name
    /// form still sees the roster and scores move.
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_, _| Some(message.to_owned()), tunnel_finder);
    }
}
