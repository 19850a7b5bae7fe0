//! Finite state machine
//!
//! A registry of state singletons, one per kind, and the currently active
//! state. Transitions are validated by the active state; hooks receive a
//! shared context explicitly.

use std::fmt::Debug;

/// A state registered with a [`StateMachine`].
///
/// `K` is the closed set of state kinds and `C` the context handed to hooks.
pub trait State<K, C>: Send {
    /// Kind this state is registered under
    fn kind(&self) -> K;

    /// Whether a transition from this state to `next` is allowed
    fn is_valid_next(&self, next: K) -> bool;

    /// Called after this state became active; `previous` is `None` on the
    /// first transition
    fn did_enter_from(&mut self, _previous: Option<K>, _context: &C) {}

    /// Called before `next` becomes active
    fn will_exit_to(&mut self, _next: K, _context: &C) {}
}

/// Transition-validated state holder
pub struct StateMachine<K, C> {
    states: Vec<Box<dyn State<K, C>>>,
    current: Option<usize>,
}

impl<K, C> StateMachine<K, C>
where
    K: Copy + Eq + Debug,
{
    /// Create a machine over `states`. Only the first state of each kind is
    /// reachable.
    pub fn new(states: Vec<Box<dyn State<K, C>>>) -> Self {
        debug_assert!(
            states
                .iter()
                .enumerate()
                .all(|(i, s)| states[..i].iter().all(|o| o.kind() != s.kind())),
            "duplicate state kind registered"
        );
        Self {
            states,
            current: None,
        }
    }

    /// Kind of the active state, if any transition happened yet
    pub fn current(&self) -> Option<K> {
        self.current.map(|i| self.states[i].kind())
    }

    /// True if there is no active state or the active state accepts `kind`
    pub fn can_enter(&self, kind: K) -> bool {
        match self.current {
            Some(i) => self.states[i].is_valid_next(kind),
            None => true,
        }
    }

    /// Transition to `kind`.
    ///
    /// Returns `false` without side effects when the transition is not
    /// allowed or `kind` was never registered.
    pub fn enter(&mut self, kind: K, context: &C) -> bool {
        if !self.can_enter(kind) {
            return false;
        }
        let Some(next) = self.position(kind) else {
            return false;
        };

        let previous = self.current;
        if let Some(i) = previous {
            self.states[i].will_exit_to(kind, context);
        }

        self.current = Some(next);

        let previous_kind = previous.map(|i| self.states[i].kind());
        self.states[next].did_enter_from(previous_kind, context);
        true
    }

    fn position(&self, kind: K) -> Option<usize> {
        self.states.iter().position(|s| s.kind() == kind)
    }
}
