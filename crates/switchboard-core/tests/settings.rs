use pretty_assertions::assert_eq;
use switchboard_core::protocol::{DataBits, Parity};
use switchboard_core::settings::{Settings, SettingsError};
use tempfile::tempdir;

#[test]
fn test_saved_settings_load_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.toml");

    let settings = Settings {
        port: Some(8080),
        device: "/dev/ttyACM2".to_string(),
        parity: Parity::Even,
        data_bits: DataBits::Seven,
        ..Settings::default()
    };
    settings.save(&path).unwrap();

    assert_eq!(Settings::load(&path).unwrap(), settings);
}

#[test]
fn test_headless_settings_omit_port() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    let settings = Settings {
        port: None,
        ..Settings::default()
    };
    settings.save(&path).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("port"));
    assert_eq!(Settings::load(&path).unwrap().port, None);
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = tempdir().unwrap();
    let result = Settings::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(SettingsError::Read { .. })));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "port = \"not a number\"\n").unwrap();

    let result = Settings::load(&path);
    assert!(matches!(result, Err(SettingsError::Parse { .. })));
}
