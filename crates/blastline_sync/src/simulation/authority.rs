//! Minimal authoritative server for a single client.

use std::collections::VecDeque;

use crate::clock::Timestamp;
use crate::error::MessageParseError;
use crate::prediction::{apply_action, MovementRules};
use crate::protocol::{
    decode_client, encode_server, ClientMessage, CodecConfig, Confirmation, DeltaCodec,
    GameStateFrame, PlayerAction, SequencedAction, ServerMessage,
};
use crate::snapshot::{BombState, EntityId, ExplosionState, PlayerState, StateSnapshot};

use super::{LoopbackHandle, NetworkConditions};

/// Fuse of a freshly placed bomb.
pub const BOMB_FUSE_MS: u32 = 2000;
/// Lifetime of an explosion.
pub const EXPLOSION_MS: u32 = 500;

/// Server counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Actions applied.
    pub actions_applied: u64,
    /// Actions that received a drift.
    pub actions_drifted: u64,
    /// `gameState` frames produced.
    pub states_sent: u64,
    /// Full snapshots among them.
    pub full_states_sent: u64,
    /// Client frames that failed to decode.
    pub bad_frames: u64,
}

/// Applies client actions with the shared movement rules, confirms each
/// one, ages bombs and explosions, and replicates state through the
/// send side of a [`DeltaCodec`].
///
/// Every outgoing message is held for `conditions.latency_ms` before it
/// reaches the client.
pub struct AuthoritativeSim {
    rules: MovementRules,
    conditions: NetworkConditions,
    player_id: EntityId,
    world: StateSnapshot,
    codec: DeltaCodec,
    next_entity: EntityId,
    last_step: Option<Timestamp>,
    in_transit: VecDeque<(Timestamp, ServerMessage)>,
    stats: SimStats,
}

impl AuthoritativeSim {
    /// Creates a world holding one player.
    #[must_use]
    pub fn new(
        player_id: EntityId,
        spawn: PlayerState,
        rules: MovementRules,
        conditions: NetworkConditions,
    ) -> Self {
        let mut world = StateSnapshot::empty(0);
        world.players.insert(player_id, spawn);
        Self {
            rules,
            conditions,
            player_id,
            world,
            codec: DeltaCodec::new(CodecConfig::default()),
            next_entity: 1000,
            last_step: None,
            in_transit: VecDeque::new(),
            stats: SimStats::default(),
        }
    }

    /// Authoritative world.
    #[must_use]
    pub const fn world(&self) -> &StateSnapshot {
        &self.world
    }

    /// Authoritative state of the client's player.
    #[must_use]
    pub fn player(&self) -> Option<&PlayerState> {
        self.world.players.get(self.player_id)
    }

    /// Mutable world, for scripting events the client did not cause.
    pub fn world_mut(&mut self) -> &mut StateSnapshot {
        &mut self.world
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Messages not yet delivered.
    #[must_use]
    pub fn in_transit(&self) -> usize {
        self.in_transit.len()
    }

    /// Handles one client frame.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError`] if the frame is not a client message.
    pub fn receive(&mut self, frame: &str, now: Timestamp) -> Result<(), MessageParseError> {
        let message = match decode_client(frame) {
            Ok(message) => message,
            Err(e) => {
                self.stats.bad_frames += 1;
                return Err(e);
            }
        };
        match message {
            ClientMessage::Ping { timestamp } => {
                self.schedule(
                    now,
                    ServerMessage::Pong {
                        timestamp: Some(timestamp),
                    },
                );
            }
            ClientMessage::PlayerAction { action, .. } => self.apply(action, now),
            ClientMessage::PlayerActionBatch { actions, .. } => {
                for action in actions {
                    self.apply(action, now);
                }
            }
            ClientMessage::RequestFullState { .. } => {
                tracing::debug!("client requested a full snapshot");
                self.codec.reset_send_baseline();
            }
        }
        Ok(())
    }

    fn apply(&mut self, action: SequencedAction, now: Timestamp) {
        let Some(current) = self.world.players.get(self.player_id).copied() else {
            return;
        };

        let mut next = apply_action(&current, &action.action, &self.rules);
        let seq = action.sequence_number;
        if self.conditions.drift != 0.0
            && self.conditions.drift_every > 0
            && seq % self.conditions.drift_every == 0
        {
            next.x = (next.x + self.conditions.drift).clamp(0.0, self.rules.width);
            self.stats.actions_drifted += 1;
        }

        if matches!(action.action, PlayerAction::PlaceBomb) && next.alive {
            let id = self.next_entity;
            self.next_entity += 1;
            self.world.bombs.insert(
                id,
                BombState {
                    x: next.x.round(),
                    y: next.y.round(),
                    owner: self.player_id,
                    timer_ms: BOMB_FUSE_MS,
                },
            );
        }

        self.world.players.insert(self.player_id, next);
        self.stats.actions_applied += 1;
        self.schedule(
            now,
            ServerMessage::ActionConfirmation {
                data: Confirmation {
                    sequence_number: seq,
                    success: true,
                    corrected_state: Some(next),
                },
                timestamp: now,
            },
        );
    }

    /// Ages timers and replicates the world if anything changed.
    pub fn step(&mut self, now: Timestamp) {
        let elapsed = self
            .last_step
            .map_or(0, |last| u32::try_from(now.saturating_sub(last)).unwrap_or(u32::MAX));
        self.last_step = Some(now);

        if elapsed > 0 {
            self.age_entities(elapsed);
        }
        self.world.captured_at = now;

        if let Some(payload) = self.codec.encode_outgoing(&self.world) {
            self.stats.states_sent += 1;
            if matches!(payload, crate::protocol::GameStatePayload::Full(_)) {
                self.stats.full_states_sent += 1;
            }
            self.schedule(
                now,
                ServerMessage::GameState(GameStateFrame {
                    payload,
                    timestamp: now,
                }),
            );
        }
    }

    fn age_entities(&mut self, elapsed: u32) {
        let explosion_ids: Vec<EntityId> = self.world.explosions.ids().collect();
        for id in explosion_ids {
            let expired = self.world.explosions.get_mut(id).is_some_and(|explosion| {
                explosion.timer_ms = explosion.timer_ms.saturating_sub(elapsed);
                explosion.timer_ms == 0
            });
            if expired {
                self.world.explosions.remove(id);
            }
        }

        // A blast created this step keeps its full lifetime
        let mut detonated = Vec::new();
        let bomb_ids: Vec<EntityId> = self.world.bombs.ids().collect();
        for id in bomb_ids {
            if let Some(bomb) = self.world.bombs.get_mut(id) {
                if bomb.timer_ms <= elapsed {
                    detonated.push(id);
                } else {
                    bomb.timer_ms -= elapsed;
                }
            }
        }
        for id in detonated {
            if let Some(bomb) = self.world.bombs.remove(id) {
                let explosion = self.next_entity;
                self.next_entity += 1;
                self.world.explosions.insert(
                    explosion,
                    ExplosionState {
                        x: bomb.x,
                        y: bomb.y,
                        timer_ms: EXPLOSION_MS,
                    },
                );
            }
        }
    }

    fn schedule(&mut self, now: Timestamp, message: ServerMessage) {
        self.in_transit
            .push_back((now + self.conditions.latency_ms, message));
    }

    /// Hands every due message to the client; returns how many.
    pub fn deliver(&mut self, handle: &LoopbackHandle, now: Timestamp) -> usize {
        let mut delivered = 0;
        while self.in_transit.front().is_some_and(|(at, _)| *at <= now) {
            let Some((_, message)) = self.in_transit.pop_front() else {
                break;
            };
            match encode_server(&message) {
                Ok(frame) => {
                    handle.push_frame(frame);
                    delivered += 1;
                }
                Err(e) => tracing::error!(error = %e, "failed to encode server message"),
            }
        }
        delivered
    }

    /// One server tick: read what the client wrote, step, deliver.
    pub fn tick(&mut self, handle: &LoopbackHandle, now: Timestamp) -> usize {
        for frame in handle.take_sent() {
            if let Err(e) = self.receive(&frame, now) {
                tracing::warn!(error = %e, "server dropped client frame");
            }
        }
        self.step(now);
        self.deliver(handle, now)
    }

    /// Forgets the connection: undelivered messages are lost and the next
    /// state goes out as a full snapshot.
    pub fn on_client_dropped(&mut self) {
        if !self.in_transit.is_empty() {
            tracing::debug!(lost = self.in_transit.len(), "client dropped with messages in flight");
        }
        self.in_transit.clear();
        self.codec.reset_send_baseline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_client, GameStatePayload};
    use crate::snapshot::Direction;

    fn sim(conditions: NetworkConditions) -> AuthoritativeSim {
        AuthoritativeSim::new(1, PlayerState::spawn(1.0, 1.0), MovementRules::default(), conditions)
    }

    fn action_frame(seq: u64, action: PlayerAction) -> String {
        encode_client(&ClientMessage::PlayerAction {
            action: SequencedAction {
                sequence_number: seq,
                action,
            },
            timestamp: 0,
            priority: crate::transport::Priority::High,
        })
        .unwrap()
    }

    #[test]
    fn test_confirms_with_shared_rules() {
        let mut server = sim(NetworkConditions::PERFECT);
        server
            .receive(&action_frame(1, PlayerAction::Move { direction: Direction::Right }), 0)
            .unwrap();

        assert_eq!(server.player().map(|p| p.x), Some(2.0));
        let (_, message) = &server.in_transit[0];
        let ServerMessage::ActionConfirmation { data, .. } = message else {
            panic!("expected confirmation");
        };
        assert_eq!(data.corrected_state.map(|s| s.x), Some(2.0));
    }

    #[test]
    fn test_drift_applies_to_every_nth() {
        let mut server = sim(NetworkConditions::DRIFTING);
        for seq in 1..=4 {
            server
                .receive(&action_frame(seq, PlayerAction::StopMoving), 0)
                .unwrap();
        }
        assert_eq!(server.stats().actions_drifted, 1);
    }

    #[test]
    fn test_bomb_lifecycle() {
        let mut server = sim(NetworkConditions::PERFECT);
        server.step(0);
        server.receive(&action_frame(1, PlayerAction::PlaceBomb), 0).unwrap();
        server.step(10);
        assert_eq!(server.world().bombs.len(), 1);

        server.step(10 + u64::from(BOMB_FUSE_MS));
        assert!(server.world().bombs.is_empty());
        assert_eq!(server.world().explosions.len(), 1);

        server.step(10 + u64::from(BOMB_FUSE_MS + EXPLOSION_MS));
        assert!(server.world().explosions.is_empty());
    }

    #[test]
    fn test_first_state_full_then_deltas() {
        let mut server = sim(NetworkConditions::PERFECT);
        server.step(0);
        server.step(16);
        server.receive(&action_frame(1, PlayerAction::StopMoving), 16).unwrap();
        server.receive(&action_frame(2, PlayerAction::Move { direction: Direction::Up }), 20).unwrap();
        server.step(32);

        let kinds: Vec<_> = server
            .in_transit
            .iter()
            .filter_map(|(_, m)| match m {
                ServerMessage::GameState(frame) => Some(frame.payload.compression()),
                _ => None,
            })
            .collect();
        // Unchanged world at 16 sends nothing
        assert_eq!(kinds.len(), 2);
        assert!(matches!(
            server.in_transit.back(),
            Some((_, ServerMessage::GameState(GameStateFrame { payload: GameStatePayload::Delta(_), .. })))
        ));
    }

    #[test]
    fn test_latency_holds_messages() {
        let (_channel, handle) = super::super::LoopbackChannel::pair();
        let mut server = sim(NetworkConditions::GOOD);
        server.receive(r#"{"type":"ping","timestamp":5}"#, 5).unwrap();

        assert_eq!(server.deliver(&handle, 20), 0);
        assert_eq!(server.deliver(&handle, 5 + NetworkConditions::GOOD.latency_ms), 1);
    }
}
