//! Local mirror of the session, rebuilt from relay events
//!
//! This is all a presentation layer needs: apply every event the relay sends
//! and draw whatever [`SessionMirror::participants`] returns.

use log::{debug, warn};
use shared::{ConnectionId, Participant, Position, ServerMessage};
use std::collections::BTreeMap;

/// What changed in the mirror after applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Synced { participants: usize },
    Appeared(ConnectionId),
    Moved(ConnectionId, Position),
    Disappeared(ConnectionId),
}

#[derive(Debug, Default)]
pub struct SessionMirror {
    own_id: Option<ConnectionId>,
    participants: BTreeMap<ConnectionId, Participant>,
    /// Moves for participants we were never told about
    unknown_moves: u64,
}

impl SessionMirror {
    pub fn new(own_id: ConnectionId) -> Self {
        Self {
            own_id: Some(own_id),
            ..Self::default()
        }
    }

    /// Applies one server event. Returns `None` for events that do not
    /// change the visible session.
    pub fn apply(&mut self, event: &ServerMessage) -> Option<Change> {
        match event {
            ServerMessage::Welcome { id } => {
                self.own_id = Some(*id);
                None
            }
            ServerMessage::SessionView { participants } => {
                self.participants = participants
                    .iter()
                    .filter(|p| Some(p.id) != self.own_id)
                    .map(|p| (p.id, p.clone()))
                    .collect();
                Some(Change::Synced {
                    participants: self.participants.len(),
                })
            }
            ServerMessage::Joined {
                id,
                display_name,
                appearance,
                position,
            } => {
                if Some(*id) == self.own_id {
                    return None;
                }
                self.participants.insert(
                    *id,
                    Participant {
                        id: *id,
                        display_name: display_name.clone(),
                        appearance: *appearance,
                        position: *position,
                    },
                );
                Some(Change::Appeared(*id))
            }
            ServerMessage::Moved { id, position } => match self.participants.get_mut(id) {
                Some(participant) => {
                    participant.position = *position;
                    Some(Change::Moved(*id, *position))
                }
                None => {
                    self.unknown_moves += 1;
                    debug!("Move for unknown participant {}", id);
                    None
                }
            },
            ServerMessage::Left { id } => self
                .participants
                .remove(id)
                .map(|_| Change::Disappeared(*id)),
            ServerMessage::Error { reason } => {
                warn!("Server reported an error: {}", reason);
                None
            }
            ServerMessage::ServerClosing => {
                self.participants.clear();
                None
            }
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn unknown_moves(&self) -> u64 {
        self.unknown_moves
    }
}
