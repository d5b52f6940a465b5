//! Loading pool configuration from disk.

use std::io::Write;

use h3wire_pool::{load_config, DiscoveryMode};

#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
stream_limit_timeout_ms = 250
max_connections_per_origin = 2
alt_svc_default_max_age_secs = 60
label_prefix = "conn"

[h3]
max_field_section_size = 32768
max_push_id = 8
enable_server_push = true
"#
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.stream_limit_timeout_ms, 250);
    assert_eq!(config.max_connections_per_origin, 2);
    assert_eq!(config.alt_svc_default_max_age_secs, 60);
    assert_eq!(config.label_prefix, "conn");
    assert_eq!(config.forward_proxy, None);
    assert_eq!(config.h3.max_field_section_size, 32768);
    assert_eq!(config.h3.max_push_id, 8);
}

#[test]
fn test_load_config_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_connections_per_origin = 0").unwrap();

    let err = load_config(file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Configuration validation failed"), "{message}");
    assert!(message.contains("max_connections_per_origin"), "{message}");
}

#[test]
fn test_load_config_reports_parse_and_io_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stream_limit_timeout_ms = \"soon\"").unwrap();
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse TOML config"));

    let dir = tempfile::tempdir().unwrap();
    let err = load_config(dir.path().join("missing.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}

#[test]
fn test_discovery_mode_names() {
    #[derive(serde::Deserialize)]
    struct Request {
        mode: DiscoveryMode,
    }
    let request: Request = toml::from_str(r#"mode = "http3_uri_only""#).unwrap();
    assert_eq!(request.mode, DiscoveryMode::Http3UriOnly);
    let request: Request = toml::from_str(r#"mode = "alt_svc""#).unwrap();
    assert_eq!(request.mode, DiscoveryMode::AltSvc);
}
