//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the switch over the serial link
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial driver failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No reply within the command timeout
    #[error("Command timed out")]
    Timeout,

    /// The pipeline was closed
    #[error("Not connected to device")]
    NotConnected,

    /// The decoder rejected the reply
    #[error("Invalid response from device: {0:?}")]
    InvalidResponse(String),

    /// A command argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The serial device does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(err.description),
            _ => ProtocolError::SerialError(err.description),
        }
    }
}

/// Failure of the link itself, reported on the pipeline's error channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// End of stream on the link
    #[error("link closed by device")]
    Eof,

    /// Reading from the link failed
    #[error("link read failed: {0}")]
    Read(String),

    /// Writing to the link failed
    #[error("link write failed: {0}")]
    Write(String),

    /// The device could not be opened
    #[error("link open failed: {0}")]
    Open(String),
}
