//! Serial Protocol Communication
//!
//! Implements the line-based text protocol of the USB switch: the command
//! catalog, the single-outstanding-request pipeline and serial port access.

pub mod commands;
mod error;
pub mod pipeline;
pub mod serial;

pub use commands::{ByteIndex, Command};
pub use error::{LinkError, ProtocolError};
pub use pipeline::{LinkErrors, Pipeline, PipelineConfig};
pub use serial::{
    list_ports, open_link, DataBits, DynLink, LinkIo, LinkSettings, Parity, PortInfo,
    SerialTransport, Transport,
};

/// Default baud rate of the switch's CDC-ACM console
pub const DEFAULT_BAUD_RATE: u32 = 9600;
