//! Device lifecycle
//!
//! ```text
//! Idle -> AwaitingDevice -> Connecting -> Connected
//!              ^                |             |
//!              |                v             |
//!              +---------- Disconnected <-----+
//! ```
//!
//! [`Lifecycle`] owns the state machine and applies transition requests one
//! at a time. States never transition directly: their hooks do their work
//! (often in spawned tasks) and ask the [`Context`] for the next state.

mod context;
mod states;

pub use context::Context;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::control::BindError;
use crate::protocol::Transport;
use crate::settings::Settings;
use crate::state_machine::StateMachine;

/// Delay between enumerations while the device is absent
pub const DEVICE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay between the first link error and the move to Disconnected
pub const TEARDOWN_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle state kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStateKind {
    /// Initial state; binds the control port
    Idle,
    /// The device was lost
    Disconnected,
    /// Polling for the device to enumerate
    AwaitingDevice,
    /// Opening and probing the link
    Connecting,
    /// Serving the control API
    Connected,
}

impl DeviceStateKind {
    /// Transition table
    pub fn can_transition(self, next: DeviceStateKind) -> bool {
        use DeviceStateKind::*;
        matches!(
            (self, next),
            (Idle, AwaitingDevice)
                | (Disconnected, AwaitingDevice)
                | (AwaitingDevice, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

impl fmt::Display for DeviceStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fatal lifecycle outcome
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The control port could not be bound
    #[error(transparent)]
    Bind(#[from] BindError),
}

pub(crate) enum LifecycleEvent {
    Enter(DeviceStateKind),
    Finish(Result<(), LifecycleError>),
}

/// Drives the device lifecycle
pub struct Lifecycle {
    machine: StateMachine<DeviceStateKind, Arc<Context>>,
    context: Arc<Context>,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    current: watch::Sender<Option<DeviceStateKind>>,
}

impl Lifecycle {
    /// Lifecycle for `settings`, reaching serial devices through `transport`.
    /// Nothing happens until [`run`](Self::run).
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        let (context, events) = Context::new(settings, transport);
        let (current, _) = watch::channel(None);
        Self {
            machine: StateMachine::new(states::registry()),
            context,
            events,
            current,
        }
    }

    /// State shared with the lifecycle states
    pub fn context(&self) -> Arc<Context> {
        self.context.clone()
    }

    /// Observe the active state
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceStateKind>> {
        self.current.subscribe()
    }

    /// Run until the lifecycle finishes.
    ///
    /// Returns `Ok(())` when the device connected and no control surface is
    /// configured, and an error when the control port cannot be bound.
    /// Otherwise cycles forever.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        self.context.apply_state(DeviceStateKind::Idle);

        while let Some(event) = self.events.recv().await {
            match event {
                LifecycleEvent::Enter(kind) => self.enter(kind),
                LifecycleEvent::Finish(outcome) => {
                    self.context.shutdown();
                    return outcome;
                }
            }
        }

        Ok(())
    }

    fn enter(&mut self, kind: DeviceStateKind) {
        let from = self.machine.current();
        if self.machine.enter(kind, &self.context) {
            self.current.send_replace(Some(kind));
        } else {
            warn!("Did not enter state {} from {:?}", kind, from);
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("current", &self.machine.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceStateKind::*;

    const ALL: [DeviceStateKind; 5] = [Idle, Disconnected, AwaitingDevice, Connecting, Connected];

    #[test]
    fn test_transition_table() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|(from, to)| from.can_transition(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Idle, AwaitingDevice),
                (Disconnected, AwaitingDevice),
                (AwaitingDevice, Connecting),
                (Connecting, Disconnected),
                (Connecting, Connected),
                (Connected, Disconnected),
            ]
        );
    }

    #[test]
    fn test_nothing_returns_to_idle() {
        assert!(ALL.iter().all(|kind| !kind.can_transition(Idle)));
    }

    #[test]
    fn test_lifecycle_starts_without_state() {
        let lifecycle = Lifecycle::new(
            Settings::default(),
            Arc::new(crate::protocol::SerialTransport),
        );
        assert_eq!(*lifecycle.subscribe().borrow(), None);
    }
}
