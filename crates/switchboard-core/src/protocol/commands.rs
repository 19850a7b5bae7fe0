//! Protocol commands
//!
//! Catalog of the text commands understood by the switch firmware. Every
//! command is an instruction string (`"<name>"` or `"<name> <arg>"`) paired
//! with a decoder for the silence-delimited response burst.

use std::fmt;

use super::ProtocolError;

/// Number of stored byte slots on the device
pub const STORED_BYTE_SLOTS: u8 = 10;

/// Decoder from a raw response burst to a typed value
pub type Decoder<R> = fn(&[u8]) -> Result<R, ProtocolError>;

/// A single device command: instruction text plus response decoder
#[derive(Clone)]
pub struct Command<R> {
    instruction: String,
    decoder: Decoder<R>,
}

impl<R> fmt::Debug for Command<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("instruction", &self.instruction)
            .finish()
    }
}

impl<R> Command<R> {
    fn new(instruction: impl Into<String>, decoder: Decoder<R>) -> Self {
        Self {
            instruction: instruction.into(),
            decoder,
        }
    }

    /// Instruction text as sent on the wire (without delimiter)
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Decode a response burst
    pub fn decode(&self, data: &[u8]) -> Result<R, ProtocolError> {
        (self.decoder)(data)
    }
}

impl Command<String> {
    /// Board and firmware version
    pub fn version() -> Self {
        Self::new("version", decode_text)
    }

    /// Human readable status report
    pub fn status() -> Self {
        Self::new("status", decode_text)
    }
}

impl Command<u32> {
    /// Currently connected port number
    pub fn port() -> Self {
        Self::new("port", decode_integer)
    }

    /// Connect to the USB port with the given number
    pub fn set_port(port: u32) -> Self {
        Self::new(format!("port {}", port), decode_integer)
    }

    /// Set the port selected at power on
    pub fn set_default_port(port: u32) -> Self {
        Self::new(format!("defaultport {}", port), decode_integer)
    }

    /// Byte value stored at `index`
    pub fn byte(index: ByteIndex) -> Self {
        Self::new(format!("get {}", index), decode_integer)
    }
}

impl Command<()> {
    /// Seconds to delay the next port change
    pub fn set_delay(seconds: u32) -> Self {
        Self::new(format!("delay {}", seconds), decode_unit)
    }

    /// Disconnect the next port change after `seconds`; sent in milliseconds
    pub fn set_timeout(seconds: u32) -> Self {
        Self::new(format!("delay {}", seconds.saturating_mul(1000)), decode_unit)
    }

    /// Enable or disable SuperSpeed
    pub fn set_superspeed(enabled: bool) -> Self {
        Self::new(format!("superspeed {}", u8::from(enabled)), decode_unit)
    }

    /// Store `value` at `index`
    pub fn put_byte(index: ByteIndex, value: u8) -> Self {
        Self::new(format!("put {} {}", index, value), decode_unit)
    }

    /// Reset the microcontroller through its GPIO line
    pub fn reset() -> Self {
        Self::new("reset", decode_unit)
    }
}

/// Index of a stored byte slot, always below [`STORED_BYTE_SLOTS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteIndex(u8);

impl ByteIndex {
    /// Validate `index`; fails with [`ProtocolError::InvalidArgument`]
    /// outside `0..10`
    pub fn new(index: u8) -> Result<Self, ProtocolError> {
        if index < STORED_BYTE_SLOTS {
            Ok(Self(index))
        } else {
            Err(ProtocolError::InvalidArgument(format!(
                "stored byte index {} out of range 0..{}",
                index, STORED_BYTE_SLOTS
            )))
        }
    }

    /// Raw slot number
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ByteIndex {
    type Error = ProtocolError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl fmt::Display for ByteIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn decode_text(data: &[u8]) -> Result<String, ProtocolError> {
    Ok(String::from_utf8_lossy(data).trim().to_string())
}

/// Accepts bare numbers as well as labelled replies such as `port: 3`
fn decode_integer(data: &[u8]) -> Result<u32, ProtocolError> {
    let text = String::from_utf8_lossy(data);
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .last()
        .and_then(|token| token.parse::<u32>().ok())
        .ok_or_else(|| ProtocolError::InvalidResponse(text.trim().to_string()))
}

fn decode_unit(_data: &[u8]) -> Result<(), ProtocolError> {
    Ok(())
}
