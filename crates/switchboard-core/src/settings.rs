//! Daemon settings
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! # HTTP port of the control API; omit to run without a control surface
//! port = 3001
//! # Seconds a control request may take before it is answered with a timeout
//! timeout = 10
//! device = "/dev/ttyACM0"
//! baud_rate = 9600
//! parity = "none"
//! data_bits = 8
//! log_level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DataBits, LinkSettings, Parity, DEFAULT_BAUD_RATE};

/// Default HTTP port of the control surface
pub const DEFAULT_PORT: u16 = 3001;

/// Default control request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where the Model 3141 enumerates on Linux
pub const DEFAULT_DEVICE: &str = "/dev/ttyACM0";

/// Failure to load or store the settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file could not be read
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid settings TOML
    #[error("Failed to parse settings in {path}: {source}")]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// The settings could not be encoded
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file or its directory could not be written
    #[error("Failed to write settings to {path}: {source}")]
    Write {
        /// Path that was written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Daemon settings, see the module docs for the file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Control API port; `None` disables the control surface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Control request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Serial device path of the switch
    #[serde(default = "default_device")]
    pub device: String,

    /// Link speed in baud
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Link parity
    #[serde(default)]
    pub parity: Parity,

    /// Data bits per character
    #[serde(default)]
    pub data_bits: DataBits,

    /// Default tracing filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            timeout: default_timeout(),
            device: default_device(),
            baud_rate: default_baud_rate(),
            parity: Parity::None,
            data_bits: DataBits::Eight,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Serial parameters for opening the device
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.baud_rate,
            parity: self.parity,
            data_bits: self.data_bits,
        }
    }

    /// Per-request timeout of the control surface
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// `<config dir>/switchboard/settings.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("switchboard")
            .join("settings.toml")
    }

    /// Parse settings read from `path`
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self, SettingsError> {
        toml::from_str(contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from `path`
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &contents)
    }

    /// Load from the default path, falling back to built-in defaults when
    /// no settings file exists
    pub fn load_or_default() -> Result<Self, SettingsError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_model_3141() {
        let settings = Settings::default();
        assert_eq!(settings.port, Some(3001));
        assert_eq!(settings.device, "/dev/ttyACM0");
        assert_eq!(settings.link_settings(), LinkSettings::default());
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_port_disables_control_surface() {
        let settings = Settings::from_toml(Path::new("inline"), "device = \"/dev/ttyACM1\"\n")
            .unwrap();
        assert_eq!(settings.port, None);
        assert_eq!(settings.device, "/dev/ttyACM1");
        assert_eq!(settings.baud_rate, 9600);
    }

    #[test]
    fn test_invalid_data_bits_rejected() {
        let result = Settings::from_toml(Path::new("inline"), "data_bits = 9\n");
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }
}
