//! # Switchboard Core Library
//!
//! Core functionality for the switchboard USB routing daemon.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The text command catalog of serial-controlled USB switches
//! - A serial command pipeline with one outstanding request at a time
//! - A generic transition-validated state machine
//! - The device lifecycle (wait for device, connect, probe, serve, reconnect)
//! - An HTTP control surface for reading and changing the route
//!
//! ## Supported devices
//!
//! - MCCI Model 3141 USB switch
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard_core::{lifecycle::Lifecycle, protocol::SerialTransport, settings::Settings};
//!
//! let settings = Settings::load_or_default()?;
//! let lifecycle = Lifecycle::new(settings, Arc::new(SerialTransport));
//! lifecycle.run().await?;
//! ```

pub mod control;
pub mod lifecycle;
pub mod protocol;
pub mod settings;
pub mod state_machine;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::control::{ControlBridge, ControlServer, Route, RouteChangeRequest, Source};
    pub use crate::lifecycle::{DeviceStateKind, Lifecycle, LifecycleError};
    pub use crate::protocol::{Command, Pipeline, ProtocolError, SerialTransport, Transport};
    pub use crate::settings::Settings;
    pub use crate::state_machine::{State, StateMachine};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
