//! # Entity Arena
//!
//! Id-keyed slot storage for replicated entities.
//!
//! ```text
//! index:  { 7 → 0, 12 → 2 }
//! slots:  [ (7, A) | vacant | (12, B) ]
//! free:   [ 1 ]
//! ```
//!
//! Removal leaves a vacant slot that the next insert reuses, so a session
//! with steady bomb/explosion churn stops allocating once warmed up.
//! Equality is by content (same ids with equal values), independent of
//! slot layout.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::EntityId;

#[derive(Clone, Debug)]
enum Slot<T> {
    Occupied { id: EntityId, value: T },
    Vacant,
}

/// Slot arena mapping [`EntityId`] to an entity value.
#[derive(Clone)]
pub struct EntityArena<T> {
    slots: Vec<Slot<T>>,
    index: HashMap<EntityId, usize>,
    free: Vec<usize>,
}

impl<T> EntityArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Creates an empty arena with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no entity is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns true if `id` is stored.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        let slot = *self.index.get(&id)?;
        match &self.slots[slot] {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant => None,
        }
    }

    /// Looks up an entity mutably.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        let slot = *self.index.get(&id)?;
        match &mut self.slots[slot] {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant => None,
        }
    }

    /// Inserts or replaces an entity, returning the previous value.
    pub fn insert(&mut self, id: EntityId, value: T) -> Option<T> {
        if let Some(&slot) = self.index.get(&id) {
            let previous = std::mem::replace(&mut self.slots[slot], Slot::Occupied { id, value });
            return match previous {
                Slot::Occupied { value, .. } => Some(value),
                Slot::Vacant => None,
            };
        }

        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Slot::Occupied { id, value };
            slot
        } else {
            self.slots.push(Slot::Occupied { id, value });
            self.slots.len() - 1
        };
        self.index.insert(id, slot);
        None
    }

    /// Removes an entity, returning its value.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        self.free.push(slot);
        match std::mem::replace(&mut self.slots[slot], Slot::Vacant) {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant => None,
        }
    }

    /// Removes every entity, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    /// Iterates live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { id, value } => Some((*id, value)),
            Slot::Vacant => None,
        })
    }

    /// Iterates live entity ids in slot order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

impl<T> Default for EntityArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PartialEq for EntityArena<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(id, value)| other.get(id).is_some_and(|theirs| theirs == value))
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ordered: BTreeMap<EntityId, &T> = self.iter().collect();
        f.debug_map().entries(ordered).finish()
    }
}

impl<T> FromIterator<(EntityId, T)> for EntityArena<T> {
    fn from_iter<I: IntoIterator<Item = (EntityId, T)>>(iter: I) -> Self {
        let mut arena = Self::new();
        for (id, value) in iter {
            arena.insert(id, value);
        }
        arena
    }
}

// On the wire an arena is a plain `{ "id": fields }` object, ordered by id.
impl<T: Serialize> Serialize for EntityArena<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ordered: BTreeMap<EntityId, &T> = self.iter().collect();
        ordered.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for EntityArena<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<EntityId, T>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
