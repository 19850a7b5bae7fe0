//! switchboard
//!
//! Keeps a serial-controlled USB switch connected and exposes its route over
//! a small HTTP API.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_core::lifecycle::Lifecycle;
use switchboard_core::protocol::{list_ports, SerialTransport};
use switchboard_core::settings::Settings;
use tracing::info;

use logging::setup_logging;

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about = "Routing daemon for serial-controlled USB switches")]
#[command(long_about = "
Waits for the USB switch to enumerate, connects to it and serves its current
route over HTTP:

    GET /input              -> {\"sourceID\": 2, \"sources\": []}
    PUT /input {\"sourceID\": 2}

The daemon reconnects whenever the link fails. Without a control port it
exits as soon as the device answered its status probe.

CONFIGURATION:
    1. Path specified with --config
    2. <config dir>/switchboard/settings.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to settings file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default settings to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_devices: bool,

    /// Serial device of the switch
    #[arg(short, long, value_name = "PATH")]
    device: Option<String>,

    /// Control API port
    #[arg(short, long, value_name = "PORT", conflicts_with = "no_control")]
    port: Option<u16>,

    /// Run without a control API
    #[arg(long)]
    no_control: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(device) = &self.device {
            settings.device = device.clone();
        }
        if let Some(port) = self.port {
            settings.port = Some(port);
        }
        if self.no_control {
            settings.port = None;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let path = Settings::default_path();
        Settings::default()
            .save(&path)
            .context("Failed to save settings")?;
        println!("Settings saved to: {}", path.display());
        return Ok(());
    }

    if args.list_devices {
        for port in list_ports() {
            match port.product {
                Some(product) => println!("{}\t{}", port.name, product),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let mut settings = match &args.config {
        Some(path) => Settings::load(path).context("Failed to load settings")?,
        None => Settings::load_or_default().context("Failed to load settings")?,
    };
    args.apply(&mut settings);

    let log_level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("switchboard v{}", switchboard_core::VERSION);
    info!(
        "Device {}, control API {}",
        settings.device,
        settings
            .port
            .map(|p| format!("on port {}", p))
            .unwrap_or_else(|| "disabled".to_string())
    );

    Lifecycle::new(settings, Arc::new(SerialTransport))
        .run()
        .await
        .context("switchboard stopped")?;

    info!("Exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_settings() {
        let args = Args::parse_from(["switchboard", "--device", "/dev/ttyACM3", "--port", "8080"]);
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.device, "/dev/ttyACM3");
        assert_eq!(settings.port, Some(8080));
    }

    #[test]
    fn test_no_control_disables_port() {
        let args = Args::parse_from(["switchboard", "--no-control"]);
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.port, None);
    }

    #[test]
    fn test_port_conflicts_with_no_control() {
        assert!(Args::try_parse_from(["switchboard", "--port", "1", "--no-control"]).is_err());
    }
}
