use clap::Parser;
use client::network::Connection;
use client::view::{Change, SessionMirror};
use client::walker::Walker;
use log::{info, warn};
use rand::seq::SliceRandom;
use shared::{Appearance, WireFormat};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless presence relay client that wanders around")]
struct Args {
    /// Relay URL to connect to
    #[arg(short = 's', long, env = "RELAY_URL", default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name announced to other participants
    #[arg(short = 'n', long, default_value = "walker")]
    name: String,

    /// red, blue, green or yellow (random if omitted)
    #[arg(short = 'a', long)]
    appearance: Option<Appearance>,

    /// Position updates sent per second
    #[arg(short = 'r', long, default_value = "10")]
    rate: u32,

    /// Walking speed in world units per second
    #[arg(long, default_value = "160")]
    speed: f32,

    /// Leave after this many moves (walk forever if omitted)
    #[arg(short = 'm', long)]
    moves: Option<u64>,

    /// Send bincode binary frames instead of JSON text
    #[arg(short = 'b', long)]
    binary: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let appearance = args
        .appearance
        .or_else(|| Appearance::ALL.choose(&mut rng).copied())
        .unwrap_or(Appearance::Red);
    let format = if args.binary {
        WireFormat::Binary
    } else {
        WireFormat::Json
    };

    let mut connection = Connection::connect(&args.server, format).await?;
    let mut mirror = SessionMirror::new(connection.id());
    let mut walker = Walker::new(args.speed);

    info!("Joining as '{}' ({})", args.name, appearance);
    connection.join(&args.name, appearance).await?;

    let mut move_interval = interval(Duration::from_secs_f32(1.0 / args.rate.max(1) as f32));
    move_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_move = Instant::now();
    let mut moves_sent = 0u64;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = connection.recv() => {
                let event = event?;
                match mirror.apply(&event) {
                    Some(Change::Synced { participants }) => {
                        info!("Joined session with {} others", participants);
                    }
                    Some(Change::Appeared(id)) => {
                        if let Some(participant) = mirror.get(id) {
                            info!("{} joined as '{}'", id, participant.display_name);
                        }
                    }
                    Some(Change::Disappeared(id)) => info!("{} left", id),
                    Some(Change::Moved(..)) | None => {}
                }

                if event == shared::ServerMessage::ServerClosing {
                    warn!("Server is shutting down");
                    break;
                }
            }

            _ = move_interval.tick() => {
                let now = Instant::now();
                let position = walker.step(now.duration_since(last_move).as_secs_f32(), &mut rng);
                last_move = now;

                connection.send_move(position).await?;
                moves_sent += 1;

                if args.moves.is_some_and(|limit| moves_sent >= limit) {
                    info!("Sent {} moves, leaving", moves_sent);
                    connection.leave().await?;
                    break;
                }
            }

            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, leaving...");
                connection.leave().await?;
                break;
            }
        }
    }

    info!(
        "Session had {} other participants when we left ({} moves for unknown participants)",
        mirror.len(),
        mirror.unknown_moves()
    );
    connection.close().await?;

    Ok(())
}
