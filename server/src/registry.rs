//! Presence registry: who is in the session and where they are
//!
//! The registry owns one record per joined connection. A connection that has
//! been accepted but has not sent `join` has no record, so it is invisible to
//! everyone else and receives no broadcasts.
//!
//! All operations are short and synchronous. The server shares one registry
//! between connection tasks as a [`SharedRegistry`], and every lifecycle
//! transition takes the write lock for exactly one mutation plus the
//! broadcast it triggers.

use crate::connection::ConnectionHandle;
use crate::router::RecipientSource;
use log::info;
use shared::{Appearance, ConnectionId, Participant, Position, SPAWN_POSITION};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub type SharedRegistry = Arc<RwLock<PresenceRegistry>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection has already joined")]
    AlreadyJoined,
    #[error("connection has not joined")]
    NotJoined,
    #[error("session is full ({0} participants)")]
    SessionFull(usize),
}

/// Registry record for one joined connection
#[derive(Debug)]
struct Entry {
    participant: Participant,
    handle: ConnectionHandle,
    /// Verified identity from the authentication service, audit only
    account: Option<String>,
}

/// Maps connection identities to participant records.
///
/// Records are kept ordered by connection identity, which is also the order
/// connections were accepted in, so snapshots and broadcasts enumerate
/// participants deterministically.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: BTreeMap<ConnectionId, Entry>,
    max_participants: Option<usize>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that refuses joins beyond `max_participants`.
    pub fn with_capacity_limit(max_participants: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_participants: Some(max_participants),
        }
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Adds a participant at the spawn position.
    ///
    /// A connection can join only once; a second join is refused with
    /// [`RegistryError::AlreadyJoined`] and leaves the existing record as is.
    pub fn register(
        &mut self,
        id: ConnectionId,
        display_name: String,
        appearance: Appearance,
        handle: ConnectionHandle,
        account: Option<String>,
    ) -> Result<Participant, RegistryError> {
        if self.entries.contains_key(&id) {
            return Err(RegistryError::AlreadyJoined);
        }

        if let Some(limit) = self.max_participants {
            if self.entries.len() >= limit {
                return Err(RegistryError::SessionFull(limit));
            }
        }

        let participant = Participant {
            id,
            display_name,
            appearance,
            position: SPAWN_POSITION,
        };

        match &account {
            Some(account) => info!(
                "{} joined as '{}' ({}, account {})",
                id, participant.display_name, appearance, account
            ),
            None => info!(
                "{} joined as '{}' ({})",
                id, participant.display_name, appearance
            ),
        }

        self.entries.insert(
            id,
            Entry {
                participant: participant.clone(),
                handle,
                account,
            },
        );

        Ok(participant)
    }

    /// Overwrites the cached position. Last write wins.
    pub fn update_position(
        &mut self,
        id: ConnectionId,
        position: Position,
    ) -> Result<(), RegistryError> {
        let entry = self.entries.get_mut(&id).ok_or(RegistryError::NotJoined)?;
        entry.participant.position = position;
        Ok(())
    }

    /// Deletes and returns the record, if there still is one.
    ///
    /// Removing an identity twice is harmless: disconnect and an explicit
    /// leave can race, and the second removal just finds nothing.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Participant> {
        self.entries.remove(&id).map(|entry| {
            info!("{} ('{}') left", id, entry.participant.display_name);
            entry.participant
        })
    }

    /// Point-in-time copy of every participant except `exclude`.
    pub fn snapshot_others(&self, exclude: ConnectionId) -> Vec<Participant> {
        self.entries
            .values()
            .filter(|entry| entry.participant.id != exclude)
            .map(|entry| entry.participant.clone())
            .collect()
    }

    /// Point-in-time copy of the whole session view.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.entries
            .values()
            .map(|entry| entry.participant.clone())
            .collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Participant> {
        self.entries.get(&id).map(|entry| entry.participant.clone())
    }

    pub fn account(&self, id: ConnectionId) -> Option<&str> {
        self.entries.get(&id).and_then(|entry| entry.account.as_deref())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the number of joined participants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RecipientSource for PresenceRegistry {
    fn recipients(&self, exclude: Option<ConnectionId>) -> Vec<ConnectionHandle> {
        self.entries
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(_, entry)| entry.handle.clone())
            .collect()
    }
}
