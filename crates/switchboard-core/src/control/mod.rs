//! Control surface
//!
//! HTTP API exposing the current route of the switch and accepting route
//! changes. The [`ControlServer`] is bound early, but requests only reach the
//! device once the connected lifecycle state installs a [`ControlBridge`].

mod bridge;
mod server;

pub use bridge::ControlBridge;
pub use server::{BindError, ControlServer};

use serde::{Deserialize, Serialize};

/// A routable source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier of the source
    pub id: u32,

    /// Description of the source, e.g. "MacBook Pro"
    pub description: String,
}

/// Current routing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Active source, or `None` when nothing is routed
    #[serde(rename = "sourceID")]
    pub source_id: Option<u32>,

    /// Known sources. Source discovery is not implemented, so this is empty.
    pub sources: Vec<Source>,
}

/// Requested routing change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteChangeRequest {
    /// Source to route, or `None` to disable routing
    pub source_id: Option<u32>,
}

/// Port number the switch uses for "no port connected"
pub(crate) const NO_PORT: u32 = 0;

impl Route {
    pub(crate) fn from_port(port: u32) -> Self {
        Self {
            source_id: (port != NO_PORT).then_some(port),
            sources: Vec::new(),
        }
    }
}

impl RouteChangeRequest {
    pub(crate) fn port(&self) -> u32 {
        self.source_id.unwrap_or(NO_PORT)
    }
}
