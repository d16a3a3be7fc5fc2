//! Server network layer handling WebSocket connections
//!
//! The accept loop hands every connection to its own task. Inside that task a
//! reader loop decodes frames and drives the connection's [`Session`], while a
//! separate writer task drains the connection's outbound queue onto the
//! socket. Nothing here serializes one connection behind another: the only
//! shared state is the presence registry.

use crate::connection::{CloseSignal, ConnectionHandle, ConnectionIdAllocator, OutboundQueue};
use crate::registry::{PresenceRegistry, SharedRegistry};
use crate::router::{send_to, FanoutRouter};
use crate::session::{Outcome, Session};
use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use shared::{ClientMessage, ConnectionId, Frame, ServerMessage, WireFormat};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, Message};

/// How long shutdown waits for connections to flush and close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long a writer waits for the close handshake before dropping the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest a single frame may take to reach the socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing connection may keep flushing queued events.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("WebSocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

/// Runtime settings for the relay
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Open connections allowed at once, joined or not
    pub max_connections: usize,
    /// Joined participants allowed at once; `None` for no limit
    pub max_participants: Option<usize>,
    /// Events buffered per connection before it is considered stuck
    pub outbound_queue: usize,
    /// Time a new socket has to complete the WebSocket handshake
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 256,
            max_participants: None,
            outbound_queue: 256,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Encoding the server answers a connection in: that of the last frame the
/// client sent, JSON until then.
#[derive(Debug, Default)]
struct PreferredFormat {
    binary: AtomicBool,
}

impl PreferredFormat {
    fn get(&self) -> WireFormat {
        if self.binary.load(Ordering::Relaxed) {
            WireFormat::Binary
        } else {
            WireFormat::Json
        }
    }

    fn set(&self, format: WireFormat) {
        self.binary
            .store(format == WireFormat::Binary, Ordering::Relaxed);
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Triggers a graceful shutdown of a running [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    registry: SharedRegistry,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Tells every participant the server is closing, then stops accepting
    /// and closes every connection.
    pub async fn shutdown(&self) {
        {
            let registry = self.registry.read().await;
            let notified =
                FanoutRouter::new(&*registry).broadcast_all(ServerMessage::ServerClosing);
            info!("Announced shutdown to {} participants", notified);
        }
        let _ = self.shutdown.send(true);
    }
}

/// State every connection task needs
#[derive(Clone)]
struct ConnectionContext {
    registry: SharedRegistry,
    outbound_queue: usize,
    handshake_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Presence relay server
pub struct Server {
    listener: TcpListener,
    registry: SharedRegistry,
    ids: ConnectionIdAllocator,
    slots: Arc<Semaphore>,
    config: ServerConfig,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let registry = match config.max_participants {
            Some(limit) => PresenceRegistry::with_capacity_limit(limit),
            None => PresenceRegistry::new(),
        };
        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener,
            registry: registry.shared(),
            ids: ConnectionIdAllocator::new(),
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            shutdown: Arc::new(shutdown),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// The registry backing this server's session.
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Accepts connections until shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        // Cloned from the receiver created at bind time, so a shutdown
        // requested before `run` started is still observed.
        let mut shutdown = self.shutdown_rx.clone();
        let mut tasks = JoinSet::new();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.dispatch(stream, addr, &mut tasks),
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!("Connection task panicked: {}", e);
                    }
                },

                _ = shutdown.changed() => break,
            }
        }

        info!(
            "Server shutting down, closing {} connections",
            tasks.len()
        );

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Connections did not close in time, aborting {}", tasks.len());
            tasks.abort_all();
        }

        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr, tasks: &mut JoinSet<()>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                info!(
                    "Rejecting connection from {}: server full ({} connections)",
                    addr, self.config.max_connections
                );
                tasks.spawn(reject_connection(stream, addr, self.config.handshake_timeout));
                return;
            }
        };

        let id = self.ids.allocate();
        let context = ConnectionContext {
            registry: Arc::clone(&self.registry),
            outbound_queue: self.config.outbound_queue,
            handshake_timeout: self.config.handshake_timeout,
            shutdown: self.shutdown_rx.clone(),
        };

        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = serve_connection(stream, addr, id, context).await {
                warn!("Connection {} from {} failed: {}", id, addr, e);
            }
        });
    }
}

/// Completes the handshake only to tell the client why it cannot stay.
async fn reject_connection(stream: TcpStream, addr: SocketAddr, handshake_timeout: Duration) {
    let mut ws = match handshake(stream, handshake_timeout).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with rejected client {} failed: {}", addr, e);
            return;
        }
    };

    let reason = ServerMessage::Error {
        reason: "Server full".to_string(),
    };
    if let Ok(frame) = Frame::encode(&reason, WireFormat::Json) {
        let _ = ws.send(into_message(frame)).await;
    }
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
}

async fn handshake(
    stream: TcpStream,
    limit: Duration,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>, ServerError> {
    match tokio::time::timeout(limit, accept_async(stream)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ServerError::HandshakeTimeout(limit)),
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    mut context: ConnectionContext,
) -> Result<(), ServerError> {
    let ws = handshake(stream, context.handshake_timeout).await?;
    info!("Client {} connected from {}", id, addr);

    let (sink, mut frames) = ws.split();
    let (handle, queue) = ConnectionHandle::channel(id, context.outbound_queue);
    let close = handle.close_signal();
    let format = Arc::new(PreferredFormat::default());

    let mut writer = tokio::spawn(write_outbound(
        sink,
        queue,
        Arc::clone(&format),
        WRITE_TIMEOUT,
    ));

    send_to(&handle, ServerMessage::Welcome { id });
    let mut session = Session::new(handle, context.registry);

    if !*context.shutdown.borrow() {
        loop {
            let next = tokio::select! {
                next = frames.next() => next,
                _ = close.raised() => {
                    info!("Closing {} after a transport failure", id);
                    break;
                }
                _ = context.shutdown.changed() => break,
            };

            let frame = match next {
                Some(Ok(Message::Text(text))) => Frame::Text(text),
                Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
                Some(Ok(Message::Close(_))) | None => break,
                // Ping and pong are answered by the WebSocket layer.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Read error on {}: {}", id, e);
                    break;
                }
            };

            handle_frame(&mut session, frame, &format).await;

            if session.state() == crate::session::SessionState::Closed {
                break;
            }
        }
    }

    session.disconnect().await;
    drop(session);

    // The writer flushes whatever is still queued, then closes the socket.
    // A client that stopped reading gets cut off after the grace period.
    let flushed = match tokio::time::timeout(FLUSH_GRACE, &mut writer).await {
        Ok(result) => result,
        Err(_) => {
            debug!("{} did not drain its queue in time, dropping it", id);
            close.raise();
            writer.await
        }
    };
    if let Err(e) = flushed {
        error!("Writer for {} panicked: {}", id, e);
    }

    info!("Client {} from {} disconnected", id, addr);
    Ok(())
}

async fn handle_frame(session: &mut Session, frame: Frame, format: &PreferredFormat) {
    format.set(frame.format());

    match frame.decode::<ClientMessage>() {
        Ok(message) => {
            let outcome = session.handle_message(message).await;
            if let Outcome::Ignored(reason) = outcome {
                trace!("Message from {} had no effect: {:?}", session.id(), reason);
            }
        }
        Err(e) => {
            warn!("Undecodable message from {}: {}", session.id(), e);
            send_to(
                session.handle(),
                ServerMessage::Error {
                    reason: e.to_string(),
                },
            );
        }
    }
}

/// Drains one connection's queue onto its socket.
///
/// Ends when every handle to the queue is gone, when a write fails or takes
/// longer than `write_timeout`, or when the connection's close signal is
/// raised. A failed or stalled write raises the close signal itself.
async fn write_outbound<S>(
    mut sink: S,
    mut queue: OutboundQueue,
    format: Arc<PreferredFormat>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let close: Arc<CloseSignal> = queue.close_signal();

    loop {
        let event = tokio::select! {
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = close.raised() => break,
        };

        let frame = match Frame::encode(&*event, format.get()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {:?}: {}", event, e);
                continue;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(write_timeout, sink.send(into_message(frame))) => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("Write failed: {}", e);
                        close.raise();
                        break;
                    }
                    Err(_) => {
                        warn!("Write stalled for {:?}, closing connection", write_timeout);
                        close.raise();
                        break;
                    }
                }
            }
            _ = close.raised() => break,
        }
    }

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio_tungstenite::connect_async;

    /// Sink whose peer never reads: it never has room for another frame.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.max_connections, 256);
        assert!(config.max_participants.is_none());
        assert!(config.outbound_queue > 0);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_preferred_format_follows_last_frame() {
        let format = PreferredFormat::default();
        assert_eq!(format.get(), WireFormat::Json);

        format.set(WireFormat::Binary);
        assert_eq!(format.get(), WireFormat::Binary);

        format.set(WireFormat::Json);
        assert_eq!(format.get(), WireFormat::Json);
    }

    #[test]
    fn test_into_message() {
        assert_eq!(
            into_message(Frame::Text("\"leave\"".to_string())),
            Message::Text("\"leave\"".to_string())
        );
        assert_eq!(
            into_message(Frame::Binary(vec![1, 2, 3])),
            Message::Binary(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = Server::bind(test_config()).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = Server::bind(ServerConfig {
            port,
            ..ServerConfig::default()
        })
        .await;

        match result {
            Err(ServerError::Bind { addr, .. }) => assert!(addr.ends_with(&port.to_string())),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Binding the same port twice should fail"),
        }
    }

    #[tokio::test]
    async fn test_new_connection_is_welcomed() {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        tokio::spawn(server.run());

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        match message {
            Message::Text(text) => {
                let decoded: ServerMessage = Frame::Text(text).decode().unwrap();
                assert!(matches!(decoded, ServerMessage::Welcome { .. }));
            }
            other => panic!("Expected text frame, got {:?}", other),
        }

        // Connected but not joined: invisible to the session.
        assert!(registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_connections_beyond_capacity_are_refused() {
        let server = Server::bind(ServerConfig {
            max_connections: 1,
            ..test_config()
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let url = format!("ws://{}", addr);
        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        // Wait for the welcome so the first connection holds its slot.
        first.next().await.unwrap().unwrap();

        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(2), second.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        match message {
            Message::Text(text) => {
                let decoded: ServerMessage = Frame::Text(text).decode().unwrap();
                assert_eq!(
                    decoded,
                    ServerMessage::Error {
                        reason: "Server full".to_string()
                    }
                );
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let server = Server::bind(test_config()).await.unwrap();
        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        shutdown.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_silent_socket_releases_slot_after_handshake_timeout() {
        let server = Server::bind(ServerConfig {
            max_connections: 1,
            handshake_timeout: Duration::from_millis(200),
            ..test_config()
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        // Takes the only slot and never starts the handshake.
        let _silent = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        match message {
            Message::Text(text) => {
                let decoded: ServerMessage = Frame::Text(text).decode().unwrap();
                assert!(matches!(decoded, ServerMessage::Welcome { .. }));
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_write_closes_connection() {
        let (handle, queue) = ConnectionHandle::channel(ConnectionId(1), 4);
        let close = handle.close_signal();
        assert!(send_to(&handle, ServerMessage::ServerClosing));

        let writer = write_outbound(
            StalledSink,
            queue,
            Arc::new(PreferredFormat::default()),
            Duration::from_millis(50),
        );

        // The handle is still alive, so only the stalled write can end the writer.
        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("writer should give up on a stalled socket");
        assert!(close.is_raised());
        assert!(handle.is_closed());
    }
}
