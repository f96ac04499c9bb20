//! End-to-end sessions driven through `SyncClient` in virtual time.

use blastline_sync::protocol::{compress, encode_server, EntityOp};
use blastline_sync::simulation::{AuthoritativeSim, LoopbackChannel, LoopbackHandle, NetworkConditions};
use blastline_sync::{
    BombState, ClientMessage, CloseCode, Confirmation, ConnectionState, Direction, EventSink,
    ManualClock, MovementRules, PlayerAction, PlayerState, SendOutcome, ServerMessage,
    StateSnapshot, SyncClient, SyncConfig, SyncError, SyncEvent, TimerKind,
};
use crossbeam_channel::Receiver;

struct Session {
    client: SyncClient<LoopbackChannel, ManualClock>,
    handle: LoopbackHandle,
    clock: ManualClock,
    events: Receiver<SyncEvent>,
}

impl Session {
    fn start(config: SyncConfig) -> Self {
        let mut session = Self::offline(config);
        session.client.connect();
        session.client.poll().unwrap();
        assert_eq!(session.client.state(), ConnectionState::Connected);
        session.drain();
        session
    }

    fn offline(config: SyncConfig) -> Self {
        let (channel, handle) = LoopbackChannel::pair();
        let clock = ManualClock::new(0);
        let (sink, events) = EventSink::channel();
        let client = SyncClient::new(config, channel, clock.clone(), sink, spawn()).unwrap();
        Self {
            client,
            handle,
            clock,
            events,
        }
    }

    fn at(&mut self, now: u64) -> &mut Self {
        self.clock.set(now);
        self
    }

    fn input(&mut self, action: PlayerAction) -> (u64, SendOutcome, PlayerState) {
        let outcome = self.client.handle_input(action).unwrap();
        (outcome.sequence_number, outcome.send, outcome.predicted)
    }

    fn server_says(&self, message: &ServerMessage) {
        self.handle.push_frame(encode_server(message).unwrap());
    }

    fn confirm(&self, sequence_number: u64, success: bool, corrected_state: Option<PlayerState>) {
        self.server_says(&ServerMessage::ActionConfirmation {
            data: Confirmation {
                sequence_number,
                success,
                corrected_state,
            },
            timestamp: self.clock_now(),
        });
    }

    fn clock_now(&self) -> u64 {
        use blastline_sync::Clock;
        self.clock.now()
    }

    fn drain(&self) -> Vec<SyncEvent> {
        self.events.try_iter().collect()
    }

    fn corrections(events: &[SyncEvent]) -> Vec<&SyncEvent> {
        events
            .iter()
            .filter(|e| matches!(e, SyncEvent::Correction(_)))
            .collect()
    }
}

fn spawn() -> PlayerState {
    PlayerState::spawn(1.0, 1.0)
}

fn right() -> PlayerAction {
    PlayerAction::Move {
        direction: Direction::Right,
    }
}

#[test]
fn test_matching_confirmation_emits_no_correction() {
    let mut s = Session::start(SyncConfig::default());

    let (seq, send, predicted) = s.input(right());
    assert_eq!(seq, 1);
    assert_eq!(send, SendOutcome::DispatchedImmediately);
    assert_eq!((predicted.x, predicted.y), (2.0, 1.0));

    s.at(40);
    s.confirm(1, true, Some(predicted));
    s.client.poll().unwrap();

    let events = s.drain();
    assert!(Session::corrections(&events).is_empty());
    assert_eq!(s.client.pending_actions(), 0);
    assert_eq!(s.client.predicted_state(), &predicted);
}

#[test]
fn test_divergent_confirmation_rolls_back_and_replays() {
    let mut s = Session::start(SyncConfig::default());

    let mut predicted = Vec::new();
    for n in 0..5 {
        s.at(n * 20);
        predicted.push(s.input(right()).2);
    }
    assert_eq!(s.client.predicted_state().x, 6.0);
    s.drain();

    // Server put seq 2 five units further right
    let mut authoritative = predicted[1];
    authoritative.x += 5.0;
    s.at(100);
    s.confirm(2, true, Some(authoritative));
    s.client.poll().unwrap();

    let events = s.drain();
    let corrections = Session::corrections(&events);
    assert_eq!(corrections.len(), 1);
    let SyncEvent::Correction(notification) = corrections[0] else {
        unreachable!();
    };
    assert_eq!(notification.sequence_number, 2);
    // 8.0 from the server, then seq 3, 4 and 5 replayed on top
    assert_eq!(notification.state.x, 11.0);
    assert_eq!(s.client.predicted_state().x, 11.0);
    assert_eq!(s.client.pending_actions(), 4);
    assert_eq!(s.client.input().pending().sequences_after(2), vec![3, 4, 5]);
}

#[test]
fn test_single_player_move_delta_carries_only_position() {
    let mut baseline = StateSnapshot::empty(0);
    baseline.players.insert(1, PlayerState::spawn(1.0, 1.0));
    baseline.players.insert(2, PlayerState::spawn(9.0, 9.0));
    baseline.bombs.insert(
        10,
        BombState {
            x: 3.0,
            y: 3.0,
            owner: 2,
            timer_ms: 2000,
        },
    );

    let mut current = baseline.clone();
    if let Some(player) = current.players.get_mut(1) {
        player.x = 2.0;
        player.y = 2.0;
    }

    let patch = compress(&current, &baseline).unwrap();
    assert_eq!(patch.players.len(), 1);
    assert!(patch.bombs.is_empty());
    assert!(patch.explosions.is_empty());
    let Some(EntityOp::Update { fields }) = patch.players.get(&1) else {
        panic!("expected an update for player 1");
    };
    assert_eq!(fields.changed_fields(), vec!["x", "y"]);

    let json = serde_json::to_value(&patch).unwrap();
    assert!(json.get("bombs").is_none());
    assert_eq!(json["players"]["1"]["fields"], serde_json::json!({"x": 2.0, "y": 2.0}));
}

#[test]
fn test_abnormal_close_reconnects_then_fails() {
    let mut s = Session::start(SyncConfig::default());
    let max_attempts = SyncConfig::default().connection.max_reconnect_attempts;
    s.handle.fail_next_opens(u32::MAX);

    s.handle.drop_connection(CloseCode::Abnormal(1006));
    s.client.poll().unwrap();
    assert_eq!(s.client.state(), ConnectionState::Reconnecting);
    assert_eq!(s.client.supervisor().attempt(), 1);
    assert_eq!(s.client.supervisor().timer(TimerKind::Reconnect), Some(1000));

    let mut failure = None;
    for _ in 0..50 {
        let Some(deadline) = s.client.supervisor().timer(TimerKind::Reconnect) else {
            break;
        };
        s.at(deadline);
        for _ in 0..2 {
            if let Err(e) = s.client.poll() {
                failure = Some(e);
            }
            assert!(s.client.supervisor().attempt() <= max_attempts);
        }
    }

    assert_eq!(s.client.state(), ConnectionState::Failed);
    assert_eq!(
        failure,
        Some(SyncError::ConnectionExhausted {
            attempts: max_attempts
        })
    );

    let events = s.drain();
    let delays: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::ReconnectScheduled { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(events.contains(&SyncEvent::ConnectionFailed {
        attempts: max_attempts
    }));

    // Reported once
    assert!(s.client.poll().is_ok());
}

#[test]
fn test_missing_pong_forces_reconnect() {
    let mut s = Session::start(SyncConfig::default());

    for now in (1000..=5000).step_by(1000) {
        s.at(now);
        s.client.poll().unwrap();
        assert_eq!(s.client.state(), ConnectionState::Connected);
    }
    let pings = s
        .handle
        .take_sent()
        .iter()
        .filter(|f| f.contains("\"ping\""))
        .count();
    assert_eq!(pings, 5);

    s.at(6000);
    s.client.poll().unwrap();

    assert_eq!(s.handle.closes(), vec![CloseCode::HEARTBEAT_TIMEOUT]);
    assert_eq!(s.client.state(), ConnectionState::Reconnecting);
    assert_eq!(s.client.supervisor().attempt(), 1);
    assert_eq!(s.client.supervisor().timer(TimerKind::Reconnect), Some(7000));

    // And the channel comes back on schedule
    s.at(7000);
    s.client.poll().unwrap();
    s.client.poll().unwrap();
    assert_eq!(s.client.state(), ConnectionState::Connected);
    assert_eq!(s.client.supervisor().attempt(), 0);
}

#[test]
fn test_pong_keeps_connection_alive() {
    let mut s = Session::start(SyncConfig::default());

    for now in (1000..=12_000).step_by(1000) {
        s.at(now);
        s.client.poll().unwrap();
        s.at(now + 30);
        s.server_says(&ServerMessage::Pong { timestamp: Some(now) });
        s.client.poll().unwrap();
    }

    assert_eq!(s.client.state(), ConnectionState::Connected);
    assert_eq!(s.client.latency_ms(), Some(30));
    assert!(s.handle.closes().is_empty());
}

#[test]
fn test_rate_limited_chat_goes_to_next_batch() {
    let mut s = Session::start(SyncConfig::default());
    let chat = |text: &str| PlayerAction::ChatMessage { text: text.into() };

    let (_, first, _) = s.input(chat("hello"));
    s.at(50);
    let (second_seq, second, _) = s.input(chat("again"));
    assert_eq!(first, SendOutcome::DispatchedImmediately);
    assert_eq!(second, SendOutcome::QueuedForBatch);

    let sent = s.handle.take_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), "playerAction");

    s.at(50 + 16);
    s.client.poll().unwrap();
    let sent = s.handle.take_messages();
    let [ClientMessage::PlayerActionBatch { actions, .. }] = sent.as_slice() else {
        panic!("expected one batch, got {sent:?}");
    };
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].sequence_number, second_seq);
}

#[test]
fn test_critical_action_overtakes_pending_batch() {
    let mut s = Session::start(SyncConfig::default());

    s.input(right());
    s.at(5);
    let (_, deferred, _) = s.input(right());
    let (_, bomb, _) = s.input(PlayerAction::PlaceBomb);
    assert_eq!(deferred, SendOutcome::QueuedForBatch);
    assert_eq!(bomb, SendOutcome::DispatchedImmediately);

    s.at(30);
    s.client.poll().unwrap();

    let kinds: Vec<String> = s
        .handle
        .take_messages()
        .iter()
        .map(|m| match m {
            ClientMessage::PlayerAction { action, .. } => action.action.kind().to_owned(),
            other => other.kind().to_owned(),
        })
        .collect();
    assert_eq!(kinds, vec!["move", "placeBomb", "playerActionBatch"]);
}

#[test]
fn test_batched_move_stays_ahead_of_newer_move() {
    let mut s = Session::start(SyncConfig::default());
    let mut server = AuthoritativeSim::new(1, spawn(), MovementRules::default(), NetworkConditions::PERFECT);
    let down = PlayerAction::Move {
        direction: Direction::Down,
    };

    s.input(right());
    s.at(5);
    let (_, deferred, _) = s.input(down);
    s.at(16);
    let (_, immediate, predicted) = s.input(right());
    assert_eq!(deferred, SendOutcome::QueuedForBatch);
    assert_eq!(immediate, SendOutcome::DispatchedImmediately);

    for now in (16..=100).step_by(16) {
        s.at(now);
        s.client.poll().unwrap();
        server.tick(&s.handle, now);
        s.client.poll().unwrap();
    }

    assert_eq!(s.client.pending_actions(), 0);
    assert_eq!(s.client.reconciliation().stats().corrections, 0);
    assert_eq!(predicted.direction, Direction::Right);
    assert_eq!(server.player(), Some(&predicted));
    assert_eq!(s.client.predicted_state(), &predicted);
}

#[test]
fn test_offline_input_flushes_on_connect() {
    let mut s = Session::offline(SyncConfig::default());

    let (_, send, predicted) = s.input(right());
    assert_eq!(send, SendOutcome::QueuedForReconnect);
    assert_eq!(predicted.x, 2.0);
    s.at(20);
    s.input(PlayerAction::PlaceBomb);
    assert!(s.handle.take_sent().is_empty());

    s.client.connect();
    s.client.poll().unwrap();

    let sequences: Vec<u64> = s
        .handle
        .take_messages()
        .iter()
        .filter_map(|m| match m {
            ClientMessage::PlayerAction { action, .. } => Some(action.sequence_number),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[test]
fn test_rejected_action_rolls_back_to_last_authoritative() {
    let mut s = Session::start(SyncConfig::default());

    let (_, _, first) = s.input(right());
    s.at(20);
    s.input(right());
    s.at(40);
    s.input(right());

    s.at(60);
    s.confirm(1, true, Some(first));
    s.confirm(2, false, None);
    s.client.poll().unwrap();

    let events = s.drain();
    assert!(events.contains(&SyncEvent::ActionRejected { sequence_number: 2 }));
    assert_eq!(Session::corrections(&events).len(), 1);
    // Back to seq 1's state, seq 3 replayed
    assert_eq!(s.client.predicted_state().x, 3.0);
}

#[test]
fn test_unconfirmed_actions_expire() {
    let mut s = Session::start(SyncConfig::default());
    s.input(right());
    s.at(20);
    s.input(right());
    assert_eq!(s.client.pending_actions(), 2);

    s.at(1021);
    s.client.poll().unwrap();
    assert_eq!(s.client.pending_actions(), 0);

    // A late confirmation changes nothing
    s.confirm(1, true, Some(PlayerState::spawn(9.0, 9.0)));
    s.client.poll().unwrap();
    assert!(Session::corrections(&s.drain()).is_empty());
    assert_eq!(s.client.predicted_state().x, 3.0);
    assert_eq!(s.client.reconciliation().stats().stale, 1);
}

fn run_against_server(conditions: NetworkConditions, inputs: u64) -> (Session, AuthoritativeSim) {
    let mut s = Session::start(SyncConfig::default());
    let mut server = AuthoritativeSim::new(1, spawn(), MovementRules::default(), conditions);
    let pattern = [Direction::Right, Direction::Down, Direction::Left, Direction::Up, Direction::Right];

    let mut now = 0;
    let mut sent = 0;
    while sent < inputs || (s.client.pending_actions() > 0 && now < 5000) {
        s.at(now);
        if sent < inputs {
            let direction = pattern[(sent % pattern.len() as u64) as usize];
            s.input(PlayerAction::Move { direction });
            sent += 1;
        }
        s.client.poll().unwrap();
        server.tick(&s.handle, now);
        s.client.poll().unwrap();
        now += 20;
    }
    (s, server)
}

#[test]
fn test_in_order_confirmations_empty_pending_table() {
    let (s, server) = run_against_server(NetworkConditions::PERFECT, 40);

    assert_eq!(s.client.pending_actions(), 0);
    assert_eq!(s.client.reconciliation().stats().confirmed, 40);
    assert_eq!(s.client.reconciliation().stats().corrections, 0);
    assert_eq!(Some(s.client.predicted_state()), server.player());
}

#[test]
fn test_server_drift_converges() {
    let (s, server) = run_against_server(NetworkConditions::DRIFTING, 40);

    assert_eq!(s.client.pending_actions(), 0);
    assert!(s.client.reconciliation().stats().corrections > 0);
    assert_eq!(Some(s.client.predicted_state()), server.player());
    assert!(s.client.world().is_some_and(|w| w.players.get(1) == server.player()));
}
