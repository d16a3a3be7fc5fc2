//! Event fan-out to connected participants
//!
//! The router never owns connections. It asks a [`RecipientSource`] (in the
//! server, the presence registry) for the current recipient set and enqueues
//! one shared event on each handle. The set is captured once per broadcast:
//! a participant that joins while a broadcast is in progress may or may not
//! receive that particular event.

use crate::connection::{ConnectionHandle, Outbound};
use log::trace;
use shared::{ConnectionId, ServerMessage};
use std::sync::Arc;

/// Anything that can enumerate the handles of joined participants.
pub trait RecipientSource {
    /// Handles of every joined participant except `exclude`.
    fn recipients(&self, exclude: Option<ConnectionId>) -> Vec<ConnectionHandle>;
}

pub struct FanoutRouter<'a, S: RecipientSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: RecipientSource + ?Sized> FanoutRouter<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Delivers `event` to every participant except `origin`.
    ///
    /// Returns how many recipients accepted the event.
    pub fn broadcast_others(&self, origin: ConnectionId, event: ServerMessage) -> usize {
        self.deliver(Some(origin), Arc::new(event))
    }

    /// Delivers `event` to every participant. Reserved for session-wide
    /// announcements that have no origin.
    pub fn broadcast_all(&self, event: ServerMessage) -> usize {
        self.deliver(None, Arc::new(event))
    }

    fn deliver(&self, exclude: Option<ConnectionId>, event: Outbound) -> usize {
        let recipients = self.source.recipients(exclude);

        let delivered = recipients
            .iter()
            .filter(|handle| handle.send(Arc::clone(&event)))
            .count();

        trace!(
            "Fan-out of {:?} reached {}/{} recipients",
            event,
            delivered,
            recipients.len()
        );

        delivered
    }
}

/// Delivers `event` to one connection, joined or not.
pub fn send_to(handle: &ConnectionHandle, event: ServerMessage) -> bool {
    handle.send(Arc::new(event))
}
