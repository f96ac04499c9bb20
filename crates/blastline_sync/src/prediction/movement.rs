//! The one function that turns an action into a new player state.
//!
//! Prediction, replay after a correction and the loopback server all call
//! [`apply_action`]. It reads nothing but its arguments, so replaying the
//! same actions from the same state always lands on the same result.

use serde::{Deserialize, Serialize};

use crate::protocol::PlayerAction;
use crate::snapshot::PlayerState;

/// Grid movement parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementRules {
    /// Distance covered by one move action.
    pub step: f32,
    /// Largest valid x.
    pub width: f32,
    /// Largest valid y.
    pub height: f32,
}

impl Default for MovementRules {
    fn default() -> Self {
        Self {
            step: 1.0,
            width: 15.0,
            height: 13.0,
        }
    }
}

/// Applies `action` to `state`.
///
/// - Dead players do not move.
/// - `Move` faces the direction, sets `moving` and steps, clamped to the
///   arena.
/// - `StopMoving` clears `moving`.
/// - Everything else leaves the player untouched.
#[must_use]
pub fn apply_action(state: &PlayerState, action: &PlayerAction, rules: &MovementRules) -> PlayerState {
    if !state.alive {
        return *state;
    }

    let mut next = *state;
    match action {
        PlayerAction::Move { direction } => {
            let (dx, dy) = direction.offset();
            next.direction = *direction;
            next.moving = true;
            next.x = (state.x + dx * rules.step).clamp(0.0, rules.width);
            next.y = (state.y + dy * rules.step).clamp(0.0, rules.height);
        }
        PlayerAction::StopMoving => next.moving = false,
        PlayerAction::PlaceBomb | PlayerAction::ChatMessage { .. } | PlayerAction::Emote { .. } => {}
    }
    next
}

/// Folds `actions` over `baseline` in order.
#[must_use]
pub fn replay<'a, I>(baseline: PlayerState, actions: I, rules: &MovementRules) -> PlayerState
where
    I: IntoIterator<Item = &'a PlayerAction>,
{
    actions
        .into_iter()
        .fold(baseline, |state, action| apply_action(&state, action, rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Direction;
    use proptest::prelude::*;

    fn step(direction: Direction) -> PlayerAction {
        PlayerAction::Move { direction }
    }

    #[test]
    fn test_move_and_stop() {
        let rules = MovementRules::default();
        let start = PlayerState::spawn(3.0, 3.0);

        let moved = apply_action(&start, &step(Direction::Right), &rules);
        assert_eq!((moved.x, moved.y), (4.0, 3.0));
        assert_eq!(moved.direction, Direction::Right);
        assert!(moved.moving);

        let stopped = apply_action(&moved, &PlayerAction::StopMoving, &rules);
        assert!(!stopped.moving);
        assert_eq!((stopped.x, stopped.y), (4.0, 3.0));
    }

    #[test]
    fn test_clamped_to_arena() {
        let rules = MovementRules::default();
        let corner = PlayerState::spawn(0.0, 13.0);

        let left = apply_action(&corner, &step(Direction::Left), &rules);
        assert_eq!(left.x, 0.0);
        let down = apply_action(&corner, &step(Direction::Down), &rules);
        assert_eq!(down.y, 13.0);
    }

    #[test]
    fn test_dead_player_frozen() {
        let mut ghost = PlayerState::spawn(5.0, 5.0);
        ghost.alive = false;

        let after = apply_action(&ghost, &step(Direction::Up), &MovementRules::default());
        assert_eq!(after, ghost);
    }

    #[test]
    fn test_non_movement_actions_ignored() {
        let start = PlayerState::spawn(2.0, 2.0);
        let rules = MovementRules::default();
        for action in [
            PlayerAction::PlaceBomb,
            PlayerAction::Emote { name: "wave".into() },
            PlayerAction::ChatMessage { text: "hi".into() },
        ] {
            assert_eq!(apply_action(&start, &action, &rules), start);
        }
    }

    fn action() -> impl Strategy<Value = PlayerAction> {
        prop_oneof![
            Just(step(Direction::Up)),
            Just(step(Direction::Down)),
            Just(step(Direction::Left)),
            Just(step(Direction::Right)),
            Just(PlayerAction::StopMoving),
            Just(PlayerAction::PlaceBomb),
        ]
    }

    proptest! {
        #[test]
        fn prop_replay_is_deterministic(
            x in 0u8..=15,
            y in 0u8..=13,
            actions in prop::collection::vec(action(), 0..32),
        ) {
            let rules = MovementRules::default();
            let baseline = PlayerState::spawn(f32::from(x), f32::from(y));

            let first = replay(baseline, &actions, &rules);
            let second = replay(baseline, &actions, &rules);
            prop_assert_eq!(first, second);
            prop_assert!(first.x >= 0.0 && first.x <= rules.width);
            prop_assert!(first.y >= 0.0 && first.y <= rules.height);
        }
    }
}
