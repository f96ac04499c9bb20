//! Deferred non-critical actions.

use crate::clock::Timestamp;
use crate::protocol::SequencedAction;

use super::Priority;

/// Actions waiting to go out together, in enqueue order.
#[derive(Clone, Debug, Default)]
pub struct OutgoingBatch {
    items: Vec<SequencedAction>,
    priority: Option<Priority>,
    oldest_at: Option<Timestamp>,
}

impl OutgoingBatch {
    /// Creates an empty batch with room for `capacity` actions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            priority: None,
            oldest_at: None,
        }
    }

    /// Appends an action.
    pub fn push(&mut self, action: SequencedAction, priority: Priority, now: Timestamp) {
        if self.items.is_empty() {
            self.oldest_at = Some(now);
        }
        self.priority = Some(self.priority.map_or(priority, |p| p.min(priority)));
        self.items.push(action);
    }

    /// Number of queued actions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Enqueue time of the oldest action.
    #[must_use]
    pub const fn oldest_at(&self) -> Option<Timestamp> {
        self.oldest_at
    }

    /// Most urgent priority among the queued actions.
    #[must_use]
    pub const fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Queued actions, oldest first.
    #[must_use]
    pub fn actions(&self) -> &[SequencedAction] {
        &self.items
    }

    /// Takes every queued action and resets the batch.
    pub fn drain(&mut self) -> (Vec<SequencedAction>, Priority) {
        let priority = self.priority.take().unwrap_or(Priority::Low);
        self.oldest_at = None;
        (std::mem::take(&mut self.items), priority)
    }
}
