//! Per-connection outbound channel and identity allocation
//!
//! A [`ConnectionHandle`] is the sink half of one client connection. Sending
//! only enqueues onto a bounded FIFO that the connection's writer task drains,
//! so a broadcast never waits on a slow socket and every recipient sees events
//! in the order they were enqueued.
//!
//! Sending to a connection that has already gone away is a silent no-op.
//! Filling a connection's queue is treated as a transport failure: the
//! handle raises the connection's close signal and the network layer tears
//! the connection down.

use log::warn;
use shared::{ConnectionId, ServerMessage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

/// Events are shared between all recipients of one broadcast.
pub type Outbound = Arc<ServerMessage>;

/// Hands out process-unique connection identities, starting at 1.
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Request to tear a connection down, raised from outside its reader task.
#[derive(Debug, Default)]
pub struct CloseSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    /// Returns true only for the call that actually raised the signal.
    pub fn raise(&self) -> bool {
        let first = !self.raised.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Completes once [`raise`](Self::raise) has been called, even if it
    /// was called before this future was created.
    pub async fn raised(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register as a waiter before checking the flag so a concurrent
        // raise cannot slip in between.
        notified.as_mut().enable();

        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

/// Sink half of one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    close: Arc<CloseSignal>,
}

impl ConnectionHandle {
    /// Creates the handle together with the queue its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, OutboundQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let close = Arc::new(CloseSignal::default());

        let handle = Self {
            id,
            sender,
            close: Arc::clone(&close),
        };
        let queue = OutboundQueue { receiver, close };

        (handle, queue)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueues an event for this connection.
    ///
    /// Returns whether the event was accepted. A closed connection silently
    /// drops it; a full queue drops it and raises the close signal, since
    /// the client can no longer be kept consistent.
    pub fn send(&self, message: Outbound) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => {
                if self.close.raise() {
                    warn!("Outbound queue for {} is full, closing connection", self.id);
                }
                false
            }
        }
    }

    /// True once the writer side is gone or the connection is being closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.close.is_raised()
    }

    pub fn close_signal(&self) -> Arc<CloseSignal> {
        Arc::clone(&self.close)
    }
}

/// Receiving half of a [`ConnectionHandle`], owned by the writer task.
#[derive(Debug)]
pub struct OutboundQueue {
    receiver: mpsc::Receiver<Outbound>,
    close: Arc<CloseSignal>,
}

impl OutboundQueue {
    /// Next queued event, or `None` once every handle has been dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.receiver.try_recv().ok()
    }

    pub fn close_signal(&self) -> Arc<CloseSignal> {
        Arc::clone(&self.close)
    }
}
