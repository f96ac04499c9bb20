//! # Session Soak
//!
//! Plays scripted sessions against the loopback server in virtual time,
//! one per network profile, and checks that the client converges.
//!
//! Each session:
//! 1. Connects and sends a stream of moves, stops, bombs and chat
//! 2. Drops the channel halfway through and lets the client reconnect
//! 3. Idles until every pending action is confirmed or evicted
//!
//! Pass `--worker` to decode and encode on the offload thread.
//! `RUST_LOG` overrides the default `warn` filter.

use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

use blastline_sync::offload::{OffloadExecutor, WorkerOffload};
use blastline_sync::prediction::reconciliation::divergence;
use blastline_sync::{
    AuthoritativeSim, CloseCode, Direction, EventSink, InlineOffload, LoopbackChannel,
    ManualClock, NetworkConditions, PlayerAction, PlayerState, SyncClient, SyncConfig,
    SyncError, SyncEvent,
};

/// Virtual tick length.
const TICK_MS: u64 = 16;
/// Scripted part of each session.
const SCRIPT_MS: u64 = 10_000;
/// Extra time allowed for confirmations to settle.
const SETTLE_MS: u64 = 3_000;
/// The channel drops at this point.
const DROP_AT_MS: u64 = 5_008;
/// One input every this many ticks.
const INPUT_EVERY: u64 = 3;

const PATROL: [Direction; 6] = [
    Direction::Right,
    Direction::Right,
    Direction::Down,
    Direction::Left,
    Direction::Left,
    Direction::Up,
];

#[derive(Default)]
struct SessionReport {
    name: &'static str,
    inputs: u64,
    predicted: u64,
    corrections: u64,
    rejected: u64,
    reconnects: u64,
    states: u64,
    full_requests: u64,
    fatal: Option<SyncError>,
    pending_left: usize,
    final_divergence: f32,
    latency_ms: Option<u64>,
}

impl SessionReport {
    fn passed(&self, tolerance: f32) -> bool {
        self.fatal.is_none() && self.pending_left == 0 && self.final_divergence <= tolerance
    }

    fn count(&mut self, rx: &Receiver<SyncEvent>) {
        for event in rx.try_iter() {
            match event {
                SyncEvent::Predicted(_) => self.predicted += 1,
                SyncEvent::Correction(_) => self.corrections += 1,
                SyncEvent::ActionRejected { .. } => self.rejected += 1,
                SyncEvent::ReconnectScheduled { .. } => self.reconnects += 1,
                SyncEvent::StateReplicated(_) => self.states += 1,
                SyncEvent::FullStateRequested { .. } => self.full_requests += 1,
                SyncEvent::ConnectionStateChanged { .. }
                | SyncEvent::ConnectionFailed { .. }
                | SyncEvent::LatencyUpdated { .. }
                | SyncEvent::PersistentDesync { .. } => {}
            }
        }
    }
}

fn scripted_action(tick: u64) -> PlayerAction {
    let step = tick / INPUT_EVERY;
    if step % 40 == 39 {
        PlayerAction::ChatMessage {
            text: format!("gg #{step}"),
        }
    } else if step % 15 == 14 {
        PlayerAction::PlaceBomb
    } else if step % 7 == 6 {
        PlayerAction::StopMoving
    } else {
        PlayerAction::Move {
            direction: PATROL[(step as usize) % PATROL.len()],
        }
    }
}

fn run_session<E: OffloadExecutor>(
    name: &'static str,
    conditions: NetworkConditions,
    config: &SyncConfig,
    executor: E,
) -> Result<SessionReport, SyncError> {
    let spawn = PlayerState::spawn(1.0, 1.0);
    let clock = ManualClock::new(0);
    let (channel, handle) = LoopbackChannel::pair();
    let (events, rx) = EventSink::channel();
    let mut server = AuthoritativeSim::new(1, spawn, config.prediction.movement, conditions);

    let mut client =
        SyncClient::with_executor(config.clone(), channel, clock.clone(), executor, events, spawn)?;

    let mut report = SessionReport {
        name,
        ..SessionReport::default()
    };
    client.connect();

    let mut now = 0;
    while now < SCRIPT_MS + SETTLE_MS {
        clock.set(now);
        let tick = now / TICK_MS;

        if now < SCRIPT_MS && tick % INPUT_EVERY == 0 {
            client.handle_input(scripted_action(tick))?;
            report.inputs += 1;
        }
        if now == DROP_AT_MS {
            tracing::info!(now, "dropping the channel");
            handle.drop_connection(CloseCode::Abnormal(1006));
            server.on_client_dropped();
        }

        if let Err(e) = client.poll() {
            tracing::error!(error = %e, "session failed");
            report.fatal = Some(e);
            break;
        }
        server.tick(&handle, now);
        if let Err(e) = client.poll() {
            report.fatal = Some(e);
            break;
        }
        report.count(&rx);

        if now >= SCRIPT_MS && client.pending_actions() == 0 {
            break;
        }
        now += TICK_MS;
    }

    report.count(&rx);
    report.pending_left = client.pending_actions();
    report.latency_ms = client.latency_ms();
    report.final_divergence = server
        .player()
        .map_or(f32::INFINITY, |auth| divergence(client.predicted_state(), auth));
    Ok(report)
}

fn print_report(reports: &[SessionReport], tolerance: f32) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                     SESSION SOAK RESULTS                         ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    for r in reports {
        let verdict = if r.passed(tolerance) { "PASS" } else { "FAIL" };
        println!("║ {:<10} [{verdict}]", r.name);
        println!(
            "║   inputs {:>5}  predicted {:>5}  corrections {:>4}  rejected {:>3}",
            r.inputs, r.predicted, r.corrections, r.rejected
        );
        println!(
            "║   states {:>5}  full requests {:>3}  reconnects {:>2}  latency {}",
            r.states,
            r.full_requests,
            r.reconnects,
            r.latency_ms.map_or_else(|| "n/a".to_owned(), |ms| format!("{ms}ms")),
        );
        println!(
            "║   pending left {:>3}  final divergence {:.2}",
            r.pending_left, r.final_divergence
        );
        if let Some(fatal) = &r.fatal {
            println!("║   fatal: {fatal}");
        }
    }
    println!("╚══════════════════════════════════════════════════════════════════╝");
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let use_worker = std::env::args().any(|arg| arg == "--worker");
    let config = SyncConfig::local();
    let tolerance = config.prediction.divergence_tolerance;

    let profiles = [
        ("perfect", NetworkConditions::PERFECT),
        ("good", NetworkConditions::GOOD),
        ("drifting", NetworkConditions::DRIFTING),
        ("jittery", NetworkConditions::JITTERY),
    ];

    let mut reports = Vec::with_capacity(profiles.len());
    for (name, conditions) in profiles {
        let result = if use_worker {
            match WorkerOffload::spawn(WorkerOffload::DEFAULT_CAPACITY) {
                Ok(worker) => run_session(name, conditions, &config, worker),
                Err(e) => {
                    eprintln!("failed to spawn offload worker: {e}");
                    std::process::exit(2);
                }
            }
        } else {
            run_session(name, conditions, &config, InlineOffload::new())
        };

        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("session {name} could not start: {e}");
                std::process::exit(2);
            }
        }
    }

    print_report(&reports, tolerance);

    if reports.iter().all(|r| r.passed(tolerance)) {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
