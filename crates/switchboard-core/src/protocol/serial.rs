//! Serial port handling
//!
//! Enumerates serial endpoints and opens the async link used by the
//! [`Pipeline`](super::Pipeline).

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Byte stream the pipeline runs over
pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

/// Boxed link handle
pub type DynLink = Box<dyn LinkIo>;

/// Parity setting of the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of data bits per character (5 to 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("unsupported data bit count {}", other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parameters used when opening the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Speed in baud; 0 falls back to [`DEFAULT_BAUD_RATE`]
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Data bits per character
    pub data_bits: DataBits,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: DataBits::Eight,
        }
    }
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key placing ttyACM* first, then ttyUSB*, each by numeric suffix,
/// then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => debug!("serial port enumeration failed: {}", e),
    }

    // The udev-backed enumeration misses CDC-ACM nodes on some systems
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open the async serial link with the given settings
pub fn open_link(path: &str, settings: &LinkSettings) -> Result<DynLink, ProtocolError> {
    let baud = if settings.baud_rate == 0 {
        warn!("baud rate is 0, defaulting to {}", DEFAULT_BAUD_RATE);
        DEFAULT_BAUD_RATE
    } else {
        settings.baud_rate
    };

    let mut stream = tokio_serial::new(path, baud)
        .parity(settings.parity.into())
        .data_bits(settings.data_bits.into())
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open_native_async()?;

    configure_lines(&mut stream);
    Ok(Box::new(stream))
}

/// Assert DTR and RTS so CDC-ACM firmware treats the host as present
fn configure_lines(port: &mut dyn SerialPort) {
    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!("failed to set DTR high: {} (continuing)", e);
    } else {
        debug!("DTR set high");
    }

    if let Err(e) = port.write_request_to_send(true) {
        warn!("failed to set RTS high: {} (continuing)", e);
    } else {
        debug!("RTS set high");
    }
}

/// Access to serial endpoints, replaceable in tests
pub trait Transport: Send + Sync {
    /// Paths of the endpoints currently present
    fn list_ports(&self) -> Result<Vec<String>, ProtocolError>;

    /// Open the endpoint at `path`
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<DynLink, ProtocolError>;
}

/// [`Transport`] backed by the host's serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn list_ports(&self) -> Result<Vec<String>, ProtocolError> {
        Ok(list_ports().into_iter().map(|p| p.name).collect())
    }

    fn open(&self, path: &str, settings: &LinkSettings) -> Result<DynLink, ProtocolError> {
        open_link(path, settings)
    }
}
