//! HTTP server for the control API

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{ControlBridge, Route, RouteChangeRequest};

/// Failure to bind the control port
#[derive(Error, Debug)]
pub enum BindError {
    /// Another process holds the port
    #[error("Port {port} is already in use")]
    AddrInUse {
        /// Requested port
        port: u16,
    },

    /// Any other bind failure
    #[error("Unable to open port {port}: {source}")]
    Other {
        /// Requested port
        port: u16,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl BindError {
    fn from_io(port: u16, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            BindError::AddrInUse { port }
        } else {
            BindError::Other { port, source }
        }
    }
}

/// Control API server. Clones share the installed bridge.
#[derive(Debug, Clone, Default)]
pub struct ControlServer {
    bridge: Arc<RwLock<Option<ControlBridge>>>,
    shutdown: CancellationToken,
}

impl ControlServer {
    /// Server without a bridge; requests fail until one is installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `port` on all interfaces and serve the control API in the
    /// background
    pub async fn listen(
        &self,
        port: u16,
        request_timeout: Duration,
    ) -> Result<SocketAddr, BindError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|e| BindError::from_io(port, e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(port, e))?;

        let app = self.router(request_timeout);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("Control server stopped: {}", e);
            }
        });

        Ok(addr)
    }

    /// Routes of the control API
    pub fn router(&self, request_timeout: Duration) -> Router {
        Router::new()
            .route("/input", get(read_route).put(change_route))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout))
    }

    /// Route requests to `bridge` from now on
    pub fn install(&self, bridge: ControlBridge) {
        *self.bridge.write().unwrap_or_else(PoisonError::into_inner) = Some(bridge);
        info!("Control API attached to device");
    }

    /// Detach the bridge; requests fail until another one is installed
    pub fn uninstall(&self) {
        if self
            .bridge
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("Control API detached from device");
        }
    }

    /// Currently installed bridge
    pub fn bridge(&self) -> Option<ControlBridge> {
        self.bridge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop serving
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn require_bridge(&self) -> Result<ControlBridge, StatusCode> {
        self.bridge().ok_or_else(|| {
            warn!("Control request while no device is connected");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }
}

/// Body of `PUT /input`; distinguishes an absent `sourceID` from `null`
#[derive(Debug, Deserialize)]
struct InputUpdate {
    #[serde(rename = "sourceID", default, deserialize_with = "present")]
    source_id: Option<Option<u32>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

async fn read_route(State(server): State<ControlServer>) -> Result<Json<Route>, StatusCode> {
    let bridge = server.require_bridge()?;
    bridge.route().await.map(Json).map_err(|e| {
        error!("Unable to read route: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn change_route(
    State(server): State<ControlServer>,
    update: Result<Json<InputUpdate>, JsonRejection>,
) -> StatusCode {
    let update = match update {
        Ok(Json(update)) => update,
        Err(rejection) => {
            warn!("Rejected route change: {}", rejection.body_text());
            return StatusCode::BAD_REQUEST;
        }
    };
    let Some(source_id) = update.source_id else {
        return StatusCode::BAD_REQUEST;
    };
    let bridge = match server.require_bridge() {
        Ok(bridge) => bridge,
        Err(status) => return status,
    };

    match bridge.change_route(RouteChangeRequest { source_id }).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("Unable to change route: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
