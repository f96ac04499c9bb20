//! # Delta Compression
//!
//! Only send what changed since the last snapshot.
//!
//! ## Patch Format
//!
//! ```text
//! DeltaPatch
//! ├── players:    { "3": { op: "update", fields: { x, y } } }
//! ├── bombs:      { "9": { op: "new",    fields: { ...all } },
//! │                 "8": { op: "removed" } }
//! ├── explosions: (absent = no change)
//! └── capturedAt
//! ```
//!
//! ## Rules
//!
//! 1. Id in current but not baseline: `new` with every field
//! 2. Id in both: `update` with only the differing tracked fields
//! 3. Id in baseline but not current: `removed`
//! 4. No ops at all: nothing is sent
//! 5. No baseline yet: send the full snapshot, never a partial diff
//!
//! Fields compare exactly. A baseline plus its patch rebuilds the
//! current snapshot bit for bit, which is what keeps both ends in step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{DeltaApplyError, DeltaOpKind};
use crate::protocol::messages::GameStatePayload;
use crate::snapshot::{
    BombState, EntityArena, EntityId, EntityKind, ExplosionState, PlayerState, StateSnapshot,
    TrackedEntity,
};

/// One change to one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", bound = "")]
pub enum EntityOp<E: TrackedEntity> {
    /// Entity appeared; carries every field.
    New {
        /// Full entity.
        fields: E,
    },
    /// Entity changed; carries only the changed fields.
    Update {
        /// Changed fields.
        fields: E::Patch,
    },
    /// Entity disappeared.
    Removed,
}

impl<E: TrackedEntity> EntityOp<E> {
    /// Operation kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> DeltaOpKind {
        match self {
            Self::New { .. } => DeltaOpKind::New,
            Self::Update { .. } => DeltaOpKind::Update,
            Self::Removed => DeltaOpKind::Removed,
        }
    }
}

/// Ops of one entity kind, keyed by entity id.
pub type KindOps<E> = BTreeMap<EntityId, EntityOp<E>>;

/// Changes between two snapshots.
///
/// A kind with no changes is left empty and omitted on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPatch {
    /// Player ops.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub players: KindOps<PlayerState>,
    /// Bomb ops.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bombs: KindOps<BombState>,
    /// Explosion ops.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub explosions: KindOps<ExplosionState>,
    /// Capture time of the snapshot this patch rebuilds.
    #[serde(default)]
    pub captured_at: Timestamp,
}

impl DeltaPatch {
    /// Returns true if no kind carries an op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.bombs.is_empty() && self.explosions.is_empty()
    }

}

/// Diffs `current` against `baseline`.
///
/// Returns `None` when nothing changed. An empty baseline yields `new`
/// ops for every entity.
#[must_use]
pub fn compress(current: &StateSnapshot, baseline: &StateSnapshot) -> Option<DeltaPatch> {
    let patch = DeltaPatch {
        players: diff_kind(&current.players, &baseline.players),
        bombs: diff_kind(&current.bombs, &baseline.bombs),
        explosions: diff_kind(&current.explosions, &baseline.explosions),
        captured_at: current.captured_at,
    };

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Rebuilds the snapshot `patch` was computed for.
///
/// Ops apply per kind in the order new → update → removed.
///
/// # Errors
///
/// Returns [`DeltaApplyError::UnknownEntity`] if an `update` or `removed`
/// op names an id that `baseline` does not hold.
pub fn decompress(
    patch: &DeltaPatch,
    baseline: &StateSnapshot,
) -> Result<StateSnapshot, DeltaApplyError> {
    let mut rebuilt = baseline.clone();
    apply_kind(EntityKind::Players, &mut rebuilt.players, &patch.players)?;
    apply_kind(EntityKind::Bombs, &mut rebuilt.bombs, &patch.bombs)?;
    apply_kind(EntityKind::Explosions, &mut rebuilt.explosions, &patch.explosions)?;
    rebuilt.captured_at = patch.captured_at;
    Ok(rebuilt)
}

fn diff_kind<E: TrackedEntity>(current: &EntityArena<E>, baseline: &EntityArena<E>) -> KindOps<E> {
    let mut ops = KindOps::new();

    for (id, entity) in current.iter() {
        match baseline.get(id) {
            None => {
                ops.insert(id, EntityOp::New { fields: entity.clone() });
            }
            Some(previous) => {
                if let Some(fields) = entity.diff(previous) {
                    ops.insert(id, EntityOp::Update { fields });
                }
            }
        }
    }

    for id in baseline.ids() {
        if !current.contains(id) {
            ops.insert(id, EntityOp::Removed);
        }
    }

    ops
}

fn apply_kind<E: TrackedEntity>(
    kind: EntityKind,
    target: &mut EntityArena<E>,
    ops: &KindOps<E>,
) -> Result<(), DeltaApplyError> {
    for (&id, op) in ops {
        if let EntityOp::New { fields } = op {
            target.insert(id, fields.clone());
        }
    }

    for (&id, op) in ops {
        if let EntityOp::Update { fields } = op {
            let entity = target.get_mut(id).ok_or(DeltaApplyError::UnknownEntity {
                kind,
                id,
                op: DeltaOpKind::Update,
            })?;
            entity.apply(fields);
        }
    }

    for (&id, op) in ops {
        if matches!(op, EntityOp::Removed) && target.remove(id).is_none() {
            return Err(DeltaApplyError::UnknownEntity {
                kind,
                id,
                op: DeltaOpKind::Removed,
            });
        }
    }

    Ok(())
}

/// Codec configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Full-snapshot requests in one desync episode before the desync is
    /// reported to the user.
    pub max_desync_before_fatal: u32,
    /// Deltas dropped while a full snapshot is outstanding before it is
    /// requested again.
    pub full_state_retry_deltas: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_desync_before_fatal: 3,
            full_state_retry_deltas: 30,
        }
    }
}

/// Stateful codec holding one baseline per direction.
///
/// - Send side: [`encode_outgoing`](Self::encode_outgoing) diffs against
///   the last snapshot it emitted.
/// - Receive side: [`apply_incoming`](Self::apply_incoming) rebuilds
///   snapshots from the last one it accepted.
///
/// Each baseline is replaced as a whole, never edited in place.
#[derive(Clone, Debug, Default)]
pub struct DeltaCodec {
    config: CodecConfig,
    send_baseline: Option<StateSnapshot>,
    recv_baseline: Option<StateSnapshot>,
    awaiting_full: bool,
    desync_count: u32,
    dropped_while_awaiting: u32,
    request_due: bool,
}

impl DeltaCodec {
    /// Creates a codec with no baselines.
    #[must_use]
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Encodes `current` for sending.
    ///
    /// Returns `None` if nothing changed since the last emitted snapshot.
    pub fn encode_outgoing(&mut self, current: &StateSnapshot) -> Option<GameStatePayload> {
        let payload = match &self.send_baseline {
            None => GameStatePayload::Full(current.clone()),
            Some(baseline) => GameStatePayload::Delta(compress(current, baseline)?),
        };
        self.send_baseline = Some(current.clone());
        Some(payload)
    }

    /// Forgets the send baseline so the next encode is a full snapshot.
    pub fn reset_send_baseline(&mut self) {
        self.send_baseline = None;
    }

    /// Applies a received payload and returns the new receive baseline.
    ///
    /// A full snapshot always succeeds and clears any desync. A delta that
    /// cannot be applied leaves the baseline untouched, puts the codec
    /// into "awaiting full snapshot" mode and makes a full-snapshot request
    /// due (see [`take_full_state_request`](Self::take_full_state_request)).
    ///
    /// Deltas arriving while a full snapshot is awaited were sent before
    /// the request reached the server; they are dropped without counting
    /// as a new desync. Only after `full_state_retry_deltas` of them is the
    /// request repeated and counted.
    ///
    /// # Errors
    ///
    /// Returns a [`DeltaApplyError`] when a delta is rejected.
    pub fn apply_incoming(
        &mut self,
        payload: GameStatePayload,
    ) -> Result<&StateSnapshot, DeltaApplyError> {
        match payload {
            GameStatePayload::Full(snapshot) => {
                self.awaiting_full = false;
                self.desync_count = 0;
                self.dropped_while_awaiting = 0;
                self.request_due = false;
                Ok(&*self.recv_baseline.insert(snapshot))
            }
            GameStatePayload::Delta(_) if self.awaiting_full => {
                self.dropped_while_awaiting += 1;
                if self.dropped_while_awaiting >= self.config.full_state_retry_deltas {
                    self.dropped_while_awaiting = 0;
                    self.desync_count += 1;
                    self.request_due = true;
                }
                Err(DeltaApplyError::AwaitingFullSnapshot)
            }
            GameStatePayload::Delta(patch) => {
                let result = match &self.recv_baseline {
                    None => Err(DeltaApplyError::NoBaseline),
                    Some(baseline) => decompress(&patch, baseline),
                };

                match result {
                    Ok(rebuilt) => Ok(&*self.recv_baseline.insert(rebuilt)),
                    Err(err) => {
                        self.awaiting_full = true;
                        self.desync_count += 1;
                        self.dropped_while_awaiting = 0;
                        self.request_due = true;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Last accepted snapshot.
    #[must_use]
    pub const fn receive_baseline(&self) -> Option<&StateSnapshot> {
        self.recv_baseline.as_ref()
    }

    /// Last emitted snapshot.
    #[must_use]
    pub const fn send_baseline(&self) -> Option<&StateSnapshot> {
        self.send_baseline.as_ref()
    }

    /// Returns true while a full snapshot is outstanding.
    #[must_use]
    pub const fn needs_full_snapshot(&self) -> bool {
        self.awaiting_full
    }

    /// Returns true once if a full-snapshot request should go out.
    pub fn take_full_state_request(&mut self) -> bool {
        std::mem::take(&mut self.request_due)
    }

    /// Full-snapshot requests made since the last full snapshot.
    #[must_use]
    pub const fn desync_count(&self) -> u32 {
        self.desync_count
    }

    /// Returns true once the desync has outlasted the configured limit.
    #[must_use]
    pub const fn desync_is_persistent(&self) -> bool {
        self.desync_count >= self.config.max_desync_before_fatal
    }

    /// Drops both baselines and any desync state.
    pub fn reset(&mut self) {
        self.send_baseline = None;
        self.recv_baseline = None;
        self.awaiting_full = false;
        self.desync_count = 0;
        self.dropped_while_awaiting = 0;
        self.request_due = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Direction;
    use proptest::prelude::*;

    fn player(x: f32, y: f32) -> PlayerState {
        PlayerState::spawn(x, y)
    }

    fn world() -> StateSnapshot {
        let mut snapshot = StateSnapshot::empty(100);
        snapshot.players.insert(1, player(1.0, 1.0));
        snapshot.players.insert(2, player(5.0, 5.0));
        snapshot.bombs.insert(
            10,
            BombState {
                x: 2.0,
                y: 2.0,
                owner: 1,
                timer_ms: 3000,
            },
        );
        snapshot
    }

    #[test]
    fn test_single_player_move() {
        let baseline = world();
        let mut current = baseline.clone();
        current.captured_at = 116;
        let moved = current.players.get_mut(1).unwrap();
        moved.x = 2.0;
        moved.y = 3.0;

        let patch = compress(&current, &baseline).unwrap();

        assert_eq!(patch.players.len(), 1);
        assert!(patch.bombs.is_empty() && patch.explosions.is_empty());
        let EntityOp::Update { fields } = &patch.players[&1] else {
            panic!("expected update op");
        };
        assert_eq!(fields.changed_fields(), vec!["x", "y"]);
    }

    #[test]
    fn test_no_change_sends_nothing() {
        let baseline = world();
        let mut current = baseline.clone();
        current.captured_at = 500;

        assert!(compress(&current, &baseline).is_none());
    }

    #[test]
    fn test_new_and_removed() {
        let baseline = world();
        let mut current = baseline.clone();
        current.bombs.remove(10);
        current.explosions.insert(
            11,
            ExplosionState {
                x: 2.0,
                y: 2.0,
                timer_ms: 500,
            },
        );

        let patch = compress(&current, &baseline).unwrap();
        assert!(matches!(patch.bombs[&10], EntityOp::Removed));
        assert!(matches!(patch.explosions[&11], EntityOp::New { .. }));
        assert!(patch.players.is_empty());
        assert_eq!(decompress(&patch, &baseline).unwrap(), current);
    }

    #[test]
    fn test_empty_baseline_is_all_new() {
        let current = world();
        let patch = compress(&current, &StateSnapshot::default()).unwrap();

        assert_eq!(patch.players.len() + patch.bombs.len() + patch.explosions.len(), 3);
        assert!(patch.players.values().all(|op| matches!(op, EntityOp::New { .. })));
        assert!(patch.bombs.values().all(|op| matches!(op, EntityOp::New { .. })));
    }

    #[test]
    fn test_update_unknown_entity_fails() {
        let mut patch = DeltaPatch::default();
        patch.players.insert(
            99,
            EntityOp::Update {
                fields: crate::snapshot::PlayerPatch {
                    x: Some(1.0),
                    ..Default::default()
                },
            },
        );

        let err = decompress(&patch, &world()).unwrap_err();
        assert_eq!(
            err,
            DeltaApplyError::UnknownEntity {
                kind: EntityKind::Players,
                id: 99,
                op: DeltaOpKind::Update,
            }
        );
    }

    #[test]
    fn test_removed_unknown_entity_fails() {
        let mut patch = DeltaPatch::default();
        patch.bombs.insert(77, EntityOp::Removed);

        assert!(matches!(
            decompress(&patch, &world()),
            Err(DeltaApplyError::UnknownEntity { op: DeltaOpKind::Removed, .. })
        ));
    }

    #[test]
    fn test_codec_first_encode_is_full() {
        let mut codec = DeltaCodec::new(CodecConfig::default());
        let first = codec.encode_outgoing(&world()).unwrap();
        assert!(matches!(first, GameStatePayload::Full(_)));

        // Unchanged world: nothing to send
        assert!(codec.encode_outgoing(&world()).is_none());

        let mut next = world();
        next.players.get_mut(2).unwrap().direction = Direction::Left;
        assert!(matches!(codec.encode_outgoing(&next), Some(GameStatePayload::Delta(_))));

        codec.reset_send_baseline();
        assert!(matches!(codec.encode_outgoing(&next), Some(GameStatePayload::Full(_))));
    }

    #[test]
    fn test_codec_desync_until_full() {
        let mut codec = DeltaCodec::new(CodecConfig {
            max_desync_before_fatal: 2,
            full_state_retry_deltas: 2,
        });

        // Delta before any baseline
        let patch = compress(&world(), &StateSnapshot::default()).unwrap();
        assert_eq!(
            codec.apply_incoming(GameStatePayload::Delta(patch.clone())),
            Err(DeltaApplyError::NoBaseline)
        );
        assert!(codec.needs_full_snapshot());
        assert!(codec.take_full_state_request());
        assert!(!codec.take_full_state_request());

        // Deltas already in flight are refused without a new request
        assert_eq!(
            codec.apply_incoming(GameStatePayload::Delta(patch.clone())),
            Err(DeltaApplyError::AwaitingFullSnapshot)
        );
        assert!(!codec.take_full_state_request());
        assert_eq!(codec.desync_count(), 1);
        assert!(!codec.desync_is_persistent());

        // Still no full snapshot after the retry bound: ask again
        assert!(codec.apply_incoming(GameStatePayload::Delta(patch)).is_err());
        assert!(codec.take_full_state_request());
        assert_eq!(codec.desync_count(), 2);
        assert!(codec.desync_is_persistent());

        let applied = codec.apply_incoming(GameStatePayload::Full(world())).unwrap();
        assert_eq!(applied.entity_count(), 3);
        assert!(!codec.needs_full_snapshot());
        assert_eq!(codec.desync_count(), 0);
    }

    #[test]
    fn test_codec_failed_delta_keeps_baseline() {
        let mut codec = DeltaCodec::new(CodecConfig::default());
        codec.apply_incoming(GameStatePayload::Full(world())).unwrap();

        let mut bad = DeltaPatch::default();
        bad.explosions.insert(5, EntityOp::Removed);
        assert!(codec.apply_incoming(GameStatePayload::Delta(bad)).is_err());

        assert_eq!(codec.receive_baseline(), Some(&world()));
    }

    #[test]
    fn test_patch_wire_roundtrip_shape() {
        let baseline = world();
        let mut current = baseline.clone();
        current.players.get_mut(1).unwrap().x = 4.0;

        let patch = compress(&current, &baseline).unwrap();
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["players"]["1"]["op"], "update");
        assert_eq!(json["players"]["1"]["fields"]["x"], 4.0);
        assert!(json.get("bombs").is_none());

        let back: DeltaPatch = serde_json::from_value(json).unwrap();
        assert_eq!(back, patch);
    }

    fn direction() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Up),
            Just(Direction::Down),
            Just(Direction::Left),
            Just(Direction::Right),
        ]
    }

    fn player_state() -> impl Strategy<Value = PlayerState> {
        (0u8..16, 0u8..14, direction(), any::<bool>(), any::<bool>()).prop_map(
            |(x, y, direction, alive, moving)| PlayerState {
                x: f32::from(x),
                y: f32::from(y),
                direction,
                alive,
                moving,
            },
        )
    }

    fn bomb_state() -> impl Strategy<Value = BombState> {
        (0u8..16, 0u8..14, 0u32..4, 0u32..3000).prop_map(|(x, y, owner, timer_ms)| BombState {
            x: f32::from(x),
            y: f32::from(y),
            owner,
            timer_ms,
        })
    }

    fn explosion_state() -> impl Strategy<Value = ExplosionState> {
        (0u8..16, 0u8..14, 0u32..600).prop_map(|(x, y, timer_ms)| ExplosionState {
            x: f32::from(x),
            y: f32::from(y),
            timer_ms,
        })
    }

    // Small id ranges so baseline and current overlap often
    fn snapshot() -> impl Strategy<Value = StateSnapshot> {
        (
            prop::collection::btree_map(0u32..6, player_state(), 0..6),
            prop::collection::btree_map(0u32..8, bomb_state(), 0..8),
            prop::collection::btree_map(0u32..8, explosion_state(), 0..8),
            0u64..10_000,
        )
            .prop_map(|(players, bombs, explosions, captured_at)| StateSnapshot {
                players: players.into_iter().collect(),
                bombs: bombs.into_iter().collect(),
                explosions: explosions.into_iter().collect(),
                captured_at,
            })
    }

    proptest! {
        #[test]
        fn prop_decompress_inverts_compress(current in snapshot(), baseline in snapshot()) {
            match compress(&current, &baseline) {
                Some(patch) => prop_assert_eq!(decompress(&patch, &baseline).unwrap(), current),
                // No ops: entities already equal
                None => {
                    prop_assert_eq!(&current.players, &baseline.players);
                    prop_assert_eq!(&current.bombs, &baseline.bombs);
                    prop_assert_eq!(&current.explosions, &baseline.explosions);
                }
            }
        }

        #[test]
        fn prop_patch_survives_json(current in snapshot(), baseline in snapshot()) {
            if let Some(patch) = compress(&current, &baseline) {
                let json = serde_json::to_string(&patch).unwrap();
                let back: DeltaPatch = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(back, patch);
            }
        }
    }
}
