//! Per-connection join/move/leave lifecycle
//!
//! Every accepted connection gets one [`Session`], driven sequentially by that
//! connection's reader task. The session is a small state machine:
//!
//! ```text
//! Connected --join--> Active --move--> Active
//!     |                  |
//!     +---disconnect-----+----disconnect----> Closed
//! ```
//!
//! Protocol mistakes (a second join, a move before join, a non-finite move)
//! are ignored rather than fatal. Each transition that changes the registry
//! holds the registry write lock for the mutation and its broadcast, so a
//! participant joining concurrently sees another participant exactly once:
//! in its session view or through the `joined` broadcast.

use crate::connection::ConnectionHandle;
use crate::registry::{RegistryError, SharedRegistry};
use crate::router::{send_to, FanoutRouter};
use log::{debug, warn};
use shared::{Appearance, ClientMessage, ConnectionId, Position, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, no participant record yet
    Connected,
    /// Joined; the registry holds a record for this connection
    Active,
    /// Terminal
    Closed,
}

/// Why a client message had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    AlreadyJoined,
    NotJoined,
    NonFinitePosition,
    SessionClosed,
}

/// Result of applying one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Joined { recipients: usize },
    Moved { recipients: usize },
    Left { recipients: usize },
    /// Connection closed without ever joining; nothing was announced
    ClosedBeforeJoin,
    Ignored(Ignored),
    /// The join was refused and the client was told why
    Rejected(RegistryError),
}

pub struct Session {
    id: ConnectionId,
    handle: ConnectionHandle,
    registry: SharedRegistry,
    state: SessionState,
}

impl Session {
    pub fn new(handle: ConnectionHandle, registry: SharedRegistry) -> Self {
        Self {
            id: handle.id(),
            handle,
            registry,
            state: SessionState::Connected,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Applies one decoded client message.
    pub async fn handle_message(&mut self, message: ClientMessage) -> Outcome {
        match message {
            ClientMessage::Join {
                display_name,
                appearance,
                account,
            } => self.join(display_name, appearance, account).await,
            ClientMessage::Move { position } => self.move_to(position).await,
            ClientMessage::Leave => self.disconnect().await,
        }
    }

    /// `Connected --join--> Active`
    ///
    /// The joiner first receives the participants already present, then
    /// everyone else is told about the joiner.
    pub async fn join(
        &mut self,
        display_name: String,
        appearance: Appearance,
        account: Option<String>,
    ) -> Outcome {
        if self.state == SessionState::Closed {
            return Outcome::Ignored(Ignored::SessionClosed);
        }

        let mut registry = self.registry.write().await;

        match registry.register(
            self.id,
            display_name,
            appearance,
            self.handle.clone(),
            account,
        ) {
            Ok(participant) => {
                self.state = SessionState::Active;

                send_to(
                    &self.handle,
                    ServerMessage::SessionView {
                        participants: registry.snapshot_others(self.id),
                    },
                );

                let recipients = FanoutRouter::new(&*registry)
                    .broadcast_others(self.id, ServerMessage::joined(&participant));

                Outcome::Joined { recipients }
            }
            Err(RegistryError::AlreadyJoined) => {
                warn!("Ignoring repeated join from {}", self.id);
                Outcome::Ignored(Ignored::AlreadyJoined)
            }
            Err(error) => {
                warn!("Refusing join from {}: {}", self.id, error);
                send_to(
                    &self.handle,
                    ServerMessage::Error {
                        reason: error.to_string(),
                    },
                );
                Outcome::Rejected(error)
            }
        }
    }

    /// `Active --move--> Active`
    ///
    /// Moves from a connection that has not joined are dropped without a
    /// broadcast; they are never queued for later.
    pub async fn move_to(&mut self, position: Position) -> Outcome {
        if self.state == SessionState::Closed {
            return Outcome::Ignored(Ignored::SessionClosed);
        }

        if !position.is_finite() {
            warn!("Ignoring non-finite position from {}", self.id);
            return Outcome::Ignored(Ignored::NonFinitePosition);
        }

        let mut registry = self.registry.write().await;

        match registry.update_position(self.id, position) {
            Ok(()) => {
                let recipients = FanoutRouter::new(&*registry).broadcast_others(
                    self.id,
                    ServerMessage::Moved {
                        id: self.id,
                        position,
                    },
                );
                debug!(
                    "{} moved to ({:.1}, {:.1}), relayed to {}",
                    self.id, position.x, position.y, recipients
                );
                Outcome::Moved { recipients }
            }
            Err(_) => {
                debug!("Discarding move from {} before join", self.id);
                Outcome::Ignored(Ignored::NotJoined)
            }
        }
    }

    /// `Connected | Active --disconnect--> Closed`
    ///
    /// Explicit leave and transport closure both end up here. Only a
    /// connection that had joined is announced as having left, and a second
    /// disconnect is a no-op.
    pub async fn disconnect(&mut self) -> Outcome {
        if self.state == SessionState::Closed {
            return Outcome::Ignored(Ignored::SessionClosed);
        }
        self.state = SessionState::Closed;

        let mut registry = self.registry.write().await;

        match registry.remove(self.id) {
            Some(_) => {
                let recipients = FanoutRouter::new(&*registry)
                    .broadcast_others(self.id, ServerMessage::Left { id: self.id });
                Outcome::Left { recipients }
            }
            None => {
                debug!("{} closed before joining", self.id);
                Outcome::ClosedBeforeJoin
            }
        }
    }
}

impl Drop for Session {
    /// A session dropped while still active (its task panicked or was
    /// cancelled) must still leave the registry and be announced.
    fn drop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let id = self.id;
        let registry = self.registry.clone();
        runtime.spawn(async move {
            let mut registry = registry.write().await;
            if registry.remove(id).is_some() {
                warn!("{} dropped without disconnecting, announcing leave", id);
                FanoutRouter::new(&*registry)
                    .broadcast_others(id, ServerMessage::Left { id });
            }
        });
    }
}
