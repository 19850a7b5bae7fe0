//! State shared by all lifecycle states

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::{DeviceStateKind, LifecycleError, LifecycleEvent};
use crate::control::ControlServer;
use crate::protocol::{Pipeline, Transport};
use crate::settings::Settings;

/// Settings, collaborators and the live connection, shared by every state
pub struct Context {
    settings: Settings,
    transport: Arc<dyn Transport>,
    server: ControlServer,
    connection: Mutex<Option<Arc<Pipeline>>>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Context {
    pub(crate) fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let context = Arc::new(Self {
            settings,
            transport,
            server: ControlServer::new(),
            connection: Mutex::new(None),
            events,
        });
        (context, rx)
    }

    /// Effective settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serial endpoint access
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// The control API server, bound or not
    pub fn server(&self) -> &ControlServer {
        &self.server
    }

    /// Pipeline of the live connection, if any
    pub fn connection(&self) -> Option<Arc<Pipeline>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the live connection, returning the previous one
    pub(crate) fn set_connection(&self, pipeline: Option<Arc<Pipeline>>) -> Option<Arc<Pipeline>> {
        std::mem::replace(
            &mut *self.connection.lock().unwrap_or_else(PoisonError::into_inner),
            pipeline,
        )
    }

    /// Request a transition to `kind`. Applied by the lifecycle driver once
    /// the current hook returned.
    pub fn apply_state(&self, kind: DeviceStateKind) {
        // Closed only after the driver returned, when transitions are moot
        let _ = self.events.send(LifecycleEvent::Enter(kind));
    }

    /// End the lifecycle with `outcome`
    pub(crate) fn finish(&self, outcome: Result<(), LifecycleError>) {
        let _ = self.events.send(LifecycleEvent::Finish(outcome));
    }

    /// Close the live connection and stop the control server
    pub(crate) fn shutdown(&self) {
        if let Some(pipeline) = self.set_connection(None) {
            pipeline.close();
        }
        self.server.shutdown();
    }
}
