//! Benchmark for delta replication and reconciliation.
//!
//! Run with: cargo bench --package blastline_sync --bench sync_benchmark

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use blastline_sync::prediction::PredictionConfig;
use blastline_sync::protocol::{compress, decompress, encode_server, GameStateFrame, GameStatePayload};
use blastline_sync::{
    BombState, Confirmation, Direction, EventSink, ExplosionState, InputProcessor, PlayerAction,
    PlayerState, ReconciliationEngine, ServerMessage, StateSnapshot,
};

fn create_world(players: u32, bombs: u32, explosions: u32) -> StateSnapshot {
    let mut world = StateSnapshot::empty(0);
    for i in 0..players {
        world
            .players
            .insert(i, PlayerState::spawn((i % 15) as f32, (i % 13) as f32));
    }
    for i in 0..bombs {
        world.bombs.insert(
            1000 + i,
            BombState {
                x: (i % 15) as f32,
                y: (i % 13) as f32,
                owner: i % players.max(1),
                timer_ms: 2000,
            },
        );
    }
    for i in 0..explosions {
        world.explosions.insert(
            2000 + i,
            ExplosionState {
                x: (i % 15) as f32,
                y: (i % 13) as f32,
                timer_ms: 500,
            },
        );
    }
    world
}

/// Moves every other player, ages every bomb, drops half the explosions.
fn next_tick(world: &StateSnapshot) -> StateSnapshot {
    let mut next = world.clone();
    let ids: Vec<u32> = next.players.ids().collect();
    for id in ids.into_iter().step_by(2) {
        if let Some(player) = next.players.get_mut(id) {
            player.x += 1.0;
            player.moving = true;
        }
    }
    let ids: Vec<u32> = next.bombs.ids().collect();
    for id in ids {
        if let Some(bomb) = next.bombs.get_mut(id) {
            bomb.timer_ms -= 16;
        }
    }
    let ids: Vec<u32> = next.explosions.ids().collect();
    for id in ids.into_iter().step_by(2) {
        next.explosions.remove(id);
    }
    next.captured_at = 16;
    next
}

fn benchmark_compress(c: &mut Criterion) {
    let baseline = create_world(64, 32, 16);
    let current = next_tick(&baseline);

    let mut group = c.benchmark_group("delta_codec");
    group.throughput(Throughput::Elements(current.entity_count() as u64));

    group.bench_function("compress_112_entities", |b| {
        b.iter(|| black_box(compress(black_box(&current), black_box(&baseline))));
    });

    let patch = compress(&current, &baseline).unwrap();
    group.bench_function("decompress_112_entities", |b| {
        b.iter(|| black_box(decompress(black_box(&patch), black_box(&baseline))));
    });

    group.bench_function("encode_delta_frame", |b| {
        let message = ServerMessage::GameState(GameStateFrame {
            payload: GameStatePayload::Delta(patch.clone()),
            timestamp: 16,
        });
        b.iter(|| black_box(encode_server(black_box(&message))));
    });

    group.finish();
}

fn benchmark_reconcile(c: &mut Criterion) {
    let pattern = [Direction::Right, Direction::Down, Direction::Left, Direction::Up];

    c.bench_function("reconcile_with_replay_32_pending", |b| {
        b.iter_batched(
            || {
                let mut input = InputProcessor::new(
                    PredictionConfig::default(),
                    PlayerState::spawn(5.0, 5.0),
                    EventSink::discard(),
                );
                for (n, direction) in pattern.iter().cycle().take(32).enumerate() {
                    input.process(PlayerAction::Move { direction: *direction }, n as u64);
                }
                input
            },
            |mut input| {
                let mut engine = ReconciliationEngine::new(0.5, 1000, EventSink::discard());
                let confirmation = Confirmation {
                    sequence_number: 1,
                    success: true,
                    corrected_state: Some(PlayerState::spawn(9.0, 9.0)),
                };
                black_box(engine.reconcile(&mut input, &confirmation, 40))
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, benchmark_compress, benchmark_reconcile);
criterion_main!(benches);
