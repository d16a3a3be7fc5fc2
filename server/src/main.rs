use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Presence relay for shared real-time sessions")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "RELAY_PORT", default_value = "8080")]
    port: u16,

    /// Maximum number of open connections, joined or not
    #[arg(short = 'c', long, env = "RELAY_MAX_CONNECTIONS", default_value = "256")]
    max_connections: usize,

    /// Maximum number of joined participants (unlimited if unset)
    #[arg(long, env = "RELAY_MAX_PARTICIPANTS")]
    max_participants: Option<usize>,

    /// Events buffered per connection before a slow client is dropped
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE", default_value = "256")]
    outbound_queue: usize,

    /// Seconds a new connection has to complete the WebSocket handshake
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT", default_value = "10")]
    handshake_timeout: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            max_connections: self.max_connections,
            max_participants: self.max_participants,
            outbound_queue: self.outbound_queue,
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = Server::bind(args.into_config()).await?;
    let shutdown = server.shutdown_handle();

    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            return match result {
                Ok(result) => result.map_err(Into::into),
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    Ok(())
                }
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown().await;
        }
    }

    match server_handle.await {
        Ok(result) => result?,
        Err(e) => error!("Server task panicked: {}", e),
    }

    Ok(())
}
