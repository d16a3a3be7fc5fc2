//! # Presence Relay Client Library
//!
//! Headless client for the presence relay. It speaks the relay protocol,
//! keeps a local picture of who else is in the session, and can generate a
//! steady stream of movement on its own. Rendering is deliberately absent:
//! a graphical front-end only needs the same three things this crate does.
//!
//! 1. Send `join` with a display name and appearance.
//! 2. Send `move` periodically with its own position.
//! 3. Apply every `joined`, `moved` and `left` event to its local view.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The WebSocket [`Connection`](network::Connection): connect, wait for the
//! server-assigned identity, send protocol messages, receive events. Frames
//! are sent as JSON text or bincode binary, as chosen at connect time.
//!
//! ### View Module (`view`)
//! [`SessionMirror`](view::SessionMirror), the local copy of the session
//! rebuilt from relay events.
//!
//! ### Walker Module (`walker`)
//! [`Walker`](walker::Walker), which wanders between random waypoints to
//! produce realistic position updates for load testing and demos.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Connection;
//! use client::view::SessionMirror;
//! use shared::{Appearance, Position, WireFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("ws://127.0.0.1:8080", WireFormat::Json).await?;
//!     let mut mirror = SessionMirror::new(connection.id());
//!
//!     connection.join("A", Appearance::Red).await?;
//!     connection.send_move(Position::new(10.0, 20.0)).await?;
//!
//!     loop {
//!         let event = connection.recv().await?;
//!         mirror.apply(&event);
//!     }
//! }
//! ```

pub mod network;
pub mod view;
pub mod walker;
