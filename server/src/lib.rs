//! # Presence Relay Server Library
//!
//! This library implements the relay that keeps every participant of a shared
//! real-time session informed about everyone else. Each client reports its own
//! position; the relay forwards it to all other joined clients and announces
//! joins and leaves. It performs no simulation and validates nothing beyond
//! the protocol itself: it is a transport and fan-out layer.
//!
//! ## Core Responsibilities
//!
//! ### Presence Tracking
//! The presence registry holds one record per joined connection (display
//! name, appearance, last known position). A connection that has not sent
//! `join` yet has no record and is invisible to everyone else.
//!
//! ### Lifecycle
//! Each connection moves through `Connected → Active → Closed`. Joining
//! announces the participant to the others and hands the joiner the current
//! session view. Closing, whether by an explicit `leave`, a close frame, or a
//! dropped socket, removes the record and announces the departure exactly
//! once.
//!
//! ### Fan-out
//! Every event originating from a participant is delivered to all other
//! joined participants, never back to its sender.
//!
//! ## Architecture Design
//!
//! ### Task per Connection
//! There is no global event loop. Each connection is served by its own reader
//! task, which processes that client's messages strictly in order, and its own
//! writer task, which drains a bounded per-connection queue onto the socket.
//! A slow or stuck client only ever fills its own queue; once full, the
//! connection is closed rather than allowed to hold up anyone else.
//!
//! ### Shared Registry
//! The presence registry is the only state shared between connections. It is
//! guarded by a read-write lock, and each lifecycle transition holds the
//! write lock for exactly one mutation plus the broadcast it causes. Enqueueing
//! never blocks, so these critical sections stay short.
//!
//! ### Ordering
//! - Events from one sender reach every other participant in send order.
//! - Events from different senders may interleave arbitrarily.
//! - A participant's `joined` is always delivered before any of its `moved`.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! Connection identities and the per-connection outbound queue.
//!
//! ### Registry Module (`registry`)
//! Participant records, keyed by connection identity.
//!
//! ### Router Module (`router`)
//! Delivery of one event to the right set of connections.
//!
//! ### Session Module (`session`)
//! The per-connection join/move/leave state machine.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, per-connection reader and writer tasks, connection
//! capacity and graceful shutdown.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig {
//!         port: 8080,
//!         max_connections: 64,
//!         ..ServerConfig::default()
//!     })
//!     .await?;
//!
//!     // Runs until a ShutdownHandle obtained from the server is triggered.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Scaling
//!
//! The relay serves one flat session. Splitting the world into rooms would
//! mean giving each room its own registry and choosing the registry per
//! connection at join time; nothing else in the lifecycle depends on there
//! being exactly one.

pub mod connection;
pub mod network;
pub mod registry;
pub mod router;
pub mod session;

pub use network::{Server, ServerConfig, ServerError, ShutdownHandle};
pub use registry::{PresenceRegistry, RegistryError, SharedRegistry};
