use noteclerk_core::{environment_config_path, Config, ConfigError};
use std::fs;

const COMPLETE: &str = r#"{
    "Version": "1.0.0",
    "LogPath": "logs",
    "ServerProtocol": "tcp",
    "ServerIp": "0.0.0.0",
    "ServerPort": "50051",
    "DbIp": "localhost",
    "DbPort": "5432",
    "DbUsername": "clerk",
    "DbPassword": "s3cret",
    "DbName": "noteclerk",
    "DbSslMode": "disable"
}"#;

#[test]
fn loads_environment_specific_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = environment_config_path(dir.path(), "Staging");
    fs::write(&path, COMPLETE).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.server_port, "50051");
    assert_eq!(config.db_settings().port, "5432");
    assert!(path.ends_with("config.staging.json"));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("config.absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.broken.json");
    fs::write(&path, "{ \"Version\": ").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn blank_required_fields_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.partial.json");
    fs::write(&path, r#"{ "Version": "1.0.0", "DbPassword": "" }"#).unwrap();

    match Config::load(&path).unwrap_err() {
        ConfigError::MissingFields(fields) => {
            assert_eq!(fields.len(), 10);
            assert!(fields.contains(&"DbPassword"));
            assert!(!fields.contains(&"Version"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
