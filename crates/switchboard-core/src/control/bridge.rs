//! Translates control requests into device commands

use std::sync::Arc;

use tracing::info;

use super::{Route, RouteChangeRequest};
use crate::protocol::{Command, Pipeline, ProtocolError};

/// Control handlers bound to one live connection
#[derive(Debug, Clone)]
pub struct ControlBridge {
    pipeline: Arc<Pipeline>,
}

impl ControlBridge {
    /// Bridge issuing commands through `pipeline`
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Query the currently connected port
    pub async fn route(&self) -> Result<Route, ProtocolError> {
        let port = self.pipeline.submit(Command::port()).await?;
        Ok(Route::from_port(port))
    }

    /// Switch to the requested port and make it the power-on default.
    ///
    /// The default is only written once the switch accepted the port.
    pub async fn change_route(&self, request: RouteChangeRequest) -> Result<(), ProtocolError> {
        let port = request.port();
        info!("Routing port {}", port);

        self.pipeline.submit(Command::set_port(port)).await?;
        self.pipeline.submit(Command::set_default_port(port)).await?;
        Ok(())
    }
}
