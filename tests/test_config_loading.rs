//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading: defaults per protocol,
//! secret resolution and error reporting.

use datonis_edge::config::{ConfigError, GatewayConfig, Protocol};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
access_key = "1d2fb5c369863fd54afafde654c26dtd51122t8e"
secret_key = "f4e31122629etaeaa48d9c8c72b8cctfc9d63acc"
protocol = "mqtt"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.access_key, "1d2fb5c369863fd54afafde654c26dtd51122t8e");
    assert_eq!(config.secret_key, "f4e31122629etaeaa48d9c8c72b8cctfc9d63acc");
    assert_eq!(config.protocol, Protocol::Mqtt);
    assert_eq!(config.api_host(), "mqtt.datonis.io");
    assert_eq!(config.api_port(), Some(1883));
    assert_eq!(config.ack.max_retries, 10);
    assert_eq!(config.instructions.queue_capacity, 1024);
}

#[test]
fn test_config_loads_with_optional_fields() {
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key = "sk"
protocol = "mqtts"
host = "broker.example.com"
port = 18883
cert_path = "/data/play/chain.pem"

[ack]
max_retries = 3
tick_ms = 500
connect_poll_ms = 100

[instructions]
queue_capacity = 16
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.api_host(), "broker.example.com");
    assert_eq!(config.api_port(), Some(18883));
    assert_eq!(
        config.cert_path.as_deref(),
        Some(Path::new("/data/play/chain.pem"))
    );
    assert_eq!(config.ack.max_retries, 3);
    assert_eq!(config.ack.tick_ms, 500);
    assert_eq!(config.ack.connect_poll_ms, 100);
    assert_eq!(config.instructions.queue_capacity, 16);
}

#[test]
fn test_https_has_no_default_port() {
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key = "sk"
protocol = "https"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.api_host(), "api.datonis.io");
    assert_eq!(config.api_port(), None);
}

#[test]
fn test_secret_resolved_from_environment() {
    std::env::set_var("DATONIS_TEST_SECRET_RESOLVED", "from-env");
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key_env = "DATONIS_TEST_SECRET_RESOLVED"
protocol = "http"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.secret_key, "from-env");
}

#[test]
fn test_inline_secret_wins_over_environment() {
    std::env::set_var("DATONIS_TEST_SECRET_IGNORED", "from-env");
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key = "inline"
secret_key_env = "DATONIS_TEST_SECRET_IGNORED"
protocol = "http"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.secret_key, "inline");
}

#[test]
fn test_config_returns_error_when_env_var_missing() {
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key_env = "DATONIS_TEST_SECRET_DEFINITELY_UNSET"
protocol = "mqtt"
"#,
    );

    let result = GatewayConfig::load_from_file(temp_file.path());

    match result {
        Err(ConfigError::EnvVarNotFound(name)) => {
            assert_eq!(name, "DATONIS_TEST_SECRET_DEFINITELY_UNSET")
        }
        other => panic!("Expected EnvVarNotFound, got {other:?}"),
    }
}

#[test]
fn test_config_returns_error_when_secret_missing() {
    let temp_file = write_config(
        r#"
access_key = "ak"
protocol = "mqtt"
"#,
    );

    let result = GatewayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::MissingSecret)));
}

#[test]
fn test_config_returns_error_for_unknown_protocol() {
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key = "sk"
protocol = "coap"
"#,
    );

    let result = GatewayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_zero_queue_capacity() {
    let temp_file = write_config(
        r#"
access_key = "ak"
secret_key = "sk"
protocol = "mqtt"

[instructions]
queue_capacity = 0
"#,
    );

    let result = GatewayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_returns_error_when_file_missing() {
    let result = GatewayConfig::load_from_file(Path::new("/nonexistent/datonis.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
