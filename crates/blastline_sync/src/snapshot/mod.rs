//! # State Snapshots
//!
//! Full replicated world state, grouped by entity kind.
//!
//! ```text
//! StateSnapshot
//! ├── players:    id → { x, y, direction, alive, moving }
//! ├── bombs:      id → { x, y, owner, timerMs }
//! ├── explosions: id → { x, y, timerMs }
//! └── capturedAt
//! ```
//!
//! Each entity type has a fixed list of tracked fields. The delta codec
//! diffs exactly those fields, so every field that exists is tracked and a
//! snapshot can always be rebuilt from a baseline plus a patch.

mod arena;

pub use arena::EntityArena;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Identifier of a replicated entity.
pub type EntityId = u32;

/// An entity whose fields are diffed individually by the delta codec.
pub trait TrackedEntity: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned {
    /// Partial form of the entity: one optional value per tracked field.
    type Patch: Clone + fmt::Debug + Default + PartialEq + Serialize + DeserializeOwned;

    /// Names of the tracked fields, in declaration order.
    const FIELDS: &'static [&'static str];

    /// Fields of `self` that differ from `baseline`, or `None` if equal.
    fn diff(&self, baseline: &Self) -> Option<Self::Patch>;

    /// Overwrites the fields present in `patch`.
    fn apply(&mut self, patch: &Self::Patch);
}

/// Declares an entity struct, its patch struct and the [`TrackedEntity`] impl.
macro_rules! tracked_entity {
    (
        $(#[$meta:meta])*
        $name:ident => $patch:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        #[doc = concat!("Changed fields of a [`", stringify!($name), "`]; absent fields are unchanged.")]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $patch {
            $(
                #[doc = concat!("New `", stringify!($field), "`, if changed.")]
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl $patch {
            /// Names of the fields carried by this patch.
            #[must_use]
            pub fn changed_fields(&self) -> Vec<&'static str> {
                let mut fields = Vec::new();
                $( if self.$field.is_some() { fields.push(stringify!($field)); } )+
                fields
            }
        }

        impl TrackedEntity for $name {
            type Patch = $patch;

            const FIELDS: &'static [&'static str] = &[$( stringify!($field) ),+];

            fn diff(&self, baseline: &Self) -> Option<$patch> {
                let mut patch = $patch::default();
                let mut changed = false;
                $(
                    if self.$field != baseline.$field {
                        patch.$field = Some(self.$field);
                        changed = true;
                    }
                )+
                changed.then_some(patch)
            }

            fn apply(&mut self, patch: &$patch) {
                $(
                    if let Some(value) = patch.$field {
                        self.$field = value;
                    }
                )+
            }
        }
    };
}

/// Facing direction of a player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards negative y.
    Up,
    /// Towards positive y.
    #[default]
    Down,
    /// Towards negative x.
    Left,
    /// Towards positive x.
    Right,
}

impl Direction {
    /// Unit offset on the grid.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> (f32, f32) {
        match self {
            Self::Up => (0.0, -1.0),
            Self::Down => (0.0, 1.0),
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
        }
    }
}

tracked_entity! {
    /// Replicated player state.
    PlayerState => PlayerPatch {
        /// Horizontal position in grid units.
        x: f32,
        /// Vertical position in grid units.
        y: f32,
        /// Facing direction.
        direction: Direction,
        /// Whether the player is alive.
        alive: bool,
        /// Whether the player is walking.
        moving: bool,
    }
}

tracked_entity! {
    /// Replicated bomb state.
    BombState => BombPatch {
        /// Horizontal position in grid units.
        x: f32,
        /// Vertical position in grid units.
        y: f32,
        /// Player who placed the bomb.
        owner: EntityId,
        /// Remaining fuse time.
        timer_ms: u32,
    }
}

tracked_entity! {
    /// Replicated explosion state.
    ExplosionState => ExplosionPatch {
        /// Horizontal position in grid units.
        x: f32,
        /// Vertical position in grid units.
        y: f32,
        /// Remaining lifetime.
        timer_ms: u32,
    }
}

impl PlayerState {
    /// A living, idle player at `(x, y)`.
    #[must_use]
    pub const fn spawn(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            direction: Direction::Down,
            alive: true,
            moving: false,
        }
    }
}

/// Entity kinds carried by a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Players.
    Players,
    /// Bombs.
    Bombs,
    /// Explosions.
    Explosions,
}

impl EntityKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Players => "players",
            Self::Bombs => "bombs",
            Self::Explosions => "explosions",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full replicated state at one instant.
///
/// Snapshots are replaced wholesale; outside code never edits a baseline
/// field by field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Players by id.
    #[serde(default)]
    pub players: EntityArena<PlayerState>,
    /// Bombs by id.
    #[serde(default)]
    pub bombs: EntityArena<BombState>,
    /// Explosions by id.
    #[serde(default)]
    pub explosions: EntityArena<ExplosionState>,
    /// Capture time on the producing side.
    #[serde(default)]
    pub captured_at: Timestamp,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty(captured_at: Timestamp) -> Self {
        Self {
            captured_at,
            ..Self::default()
        }
    }

    /// Total number of entities across all kinds.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.players.len() + self.bombs.len() + self.explosions.len()
    }
}
