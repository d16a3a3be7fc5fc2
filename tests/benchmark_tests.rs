//! Performance benchmarks for the relay's hot paths

use server::connection::{ConnectionHandle, OutboundQueue};
use server::registry::PresenceRegistry;
use server::router::FanoutRouter;
use shared::{Appearance, ConnectionId, Frame, Position, ServerMessage, WireFormat};
use std::time::Instant;

fn populated_registry(
    participants: u64,
    queue: usize,
) -> (PresenceRegistry, Vec<OutboundQueue>) {
    let mut registry = PresenceRegistry::new();
    let mut queues = Vec::new();

    for i in 1..=participants {
        let id = ConnectionId(i);
        let (handle, outbound) = ConnectionHandle::channel(id, queue);
        registry
            .register(id, format!("P{}", i), Appearance::Red, handle, None)
            .unwrap();
        queues.push(outbound);
    }

    (registry, queues)
}

/// Benchmarks joining and leaving the registry
#[test]
fn benchmark_registry_churn() {
    let iterations = 10_000u64;
    let mut registry = PresenceRegistry::new();
    let start = Instant::now();

    for i in 1..=iterations {
        let id = ConnectionId(i);
        let (handle, _queue) = ConnectionHandle::channel(id, 1);
        registry
            .register(id, "churn".to_string(), Appearance::Blue, handle, None)
            .unwrap();
        registry.remove(id);
    }

    let duration = start.elapsed();
    println!(
        "Registry join/leave: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(registry.is_empty());
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks position updates against a busy registry
#[test]
fn benchmark_position_updates() {
    let (mut registry, _queues) = populated_registry(200, 1);
    let iterations = 100_000u64;
    let start = Instant::now();

    for i in 0..iterations {
        let id = ConnectionId(i % 200 + 1);
        registry
            .update_position(id, Position::new((i % 800) as f32, 300.0))
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Position updates: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 500);
}

/// Benchmarks building the session view handed to a joiner
#[test]
fn benchmark_session_view_snapshot() {
    let (registry, _queues) = populated_registry(200, 1);
    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let view = registry.snapshot_others(ConnectionId(i % 200 + 1));
        assert_eq!(view.len(), 199);
    }

    let duration = start.elapsed();
    println!(
        "Session view (200 participants): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks fan-out of a move to every other participant
#[test]
fn benchmark_fanout() {
    let participants = 100u64;
    let rounds = 200u64;
    let (registry, mut queues) = populated_registry(participants, rounds as usize);
    let router = FanoutRouter::new(&registry);

    let start = Instant::now();
    let mut delivered = 0;

    for round in 0..rounds {
        let origin = ConnectionId(round % participants + 1);
        delivered += router.broadcast_others(
            origin,
            ServerMessage::Moved {
                id: origin,
                position: Position::new(round as f32, 0.0),
            },
        );
    }

    let duration = start.elapsed();
    println!(
        "Fan-out: {} events to {} participants in {:?} ({:.2} μs/event)",
        rounds,
        participants,
        duration,
        duration.as_micros() as f64 / rounds as f64
    );

    assert_eq!(delivered as u64, rounds * (participants - 1));
    // Every queue got one event per round it did not originate.
    let first = &mut queues[0];
    let mut received = 0;
    while first.try_recv().is_some() {
        received += 1;
    }
    assert_eq!(received, rounds - rounds / participants);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding a move in both wire formats
#[test]
fn benchmark_wire_encoding() {
    let event = ServerMessage::Moved {
        id: ConnectionId(42),
        position: Position::new(123.5, 456.25),
    };
    let iterations = 10_000;

    for format in [WireFormat::Json, WireFormat::Binary] {
        let start = Instant::now();
        let mut bytes = 0;

        for _ in 0..iterations {
            bytes += match Frame::encode(&event, format).unwrap() {
                Frame::Text(text) => text.len(),
                Frame::Binary(data) => data.len(),
            };
        }

        let duration = start.elapsed();
        println!(
            "{:?} encoding: {} iterations in {:?} ({:.2} ns/iter, {} bytes/frame)",
            format,
            iterations,
            duration,
            duration.as_nanos() as f64 / iterations as f64,
            bytes / iterations
        );

        assert!(duration.as_millis() < 1000);
    }
}
