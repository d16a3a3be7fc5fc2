//! WebSocket connection to the presence relay

use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{
    Appearance, ClientMessage, ConnectionId, Frame, Position, ProtocolError, ServerMessage,
    WireFormat,
};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long [`Connection::connect`] waits for the server's welcome.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by server")]
    Closed,
    #[error("expected welcome from server, got {0:?}")]
    UnexpectedGreeting(Box<ServerMessage>),
    #[error("timed out waiting for the server")]
    Timeout,
}

/// One client connection to the relay.
pub struct Connection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: ConnectionId,
    format: WireFormat,
}

impl Connection {
    /// Opens a connection and waits for the server to assign an identity.
    ///
    /// `format` selects the encoding of frames this client sends; the server
    /// answers in kind.
    pub async fn connect(url: &str, format: WireFormat) -> Result<Self, ClientError> {
        info!("Connecting to {}...", url);
        let (mut ws, _) = connect_async(url).await?;

        let greeting = tokio::time::timeout(WELCOME_TIMEOUT, next_message(&mut ws))
            .await
            .map_err(|_| ClientError::Timeout)??;

        match greeting {
            ServerMessage::Welcome { id } => {
                info!("Connected! Connection ID: {}", id);
                Ok(Self { ws, id, format })
            }
            other => Err(ClientError::UnexpectedGreeting(Box::new(other))),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let message = match Frame::encode(message, self.format)? {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        self.send_raw(message).await
    }

    /// Sends a frame as is, bypassing the protocol encoder.
    pub async fn send_raw(&mut self, message: Message) -> Result<(), ClientError> {
        self.ws.send(message).await?;
        Ok(())
    }

    pub async fn join(
        &mut self,
        display_name: &str,
        appearance: Appearance,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::Join {
            display_name: display_name.to_string(),
            appearance,
            account: None,
        })
        .await
    }

    pub async fn send_move(&mut self, position: Position) -> Result<(), ClientError> {
        self.send(&ClientMessage::Move { position }).await
    }

    pub async fn leave(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Leave).await
    }

    /// Waits for the next protocol message from the server.
    pub async fn recv(&mut self) -> Result<ServerMessage, ClientError> {
        next_message(&mut self.ws).await
    }

    /// Like [`recv`](Self::recv), but gives up after `timeout` and returns
    /// `None` instead of an error.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ServerMessage>, ClientError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Closes the connection with a WebSocket close handshake.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }

    /// Drops the socket without a close handshake, the way a crashed client
    /// or a lost network would.
    pub fn abort(self) {
        debug!("Dropping connection {} without closing", self.id);
        drop(self.ws);
    }
}

async fn next_message(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<ServerMessage, ClientError> {
    loop {
        let frame = match ws.next().await {
            Some(Ok(Message::Text(text))) => Frame::Text(text),
            Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        return Ok(frame.decode()?);
    }
}
