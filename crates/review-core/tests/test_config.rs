use review_core::config::{GatewayKind, ReviewConfig};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_parse_full_config() {
    let json = r#"{
        "gateway": {
            "kind": "rest",
            "url": "https://mtr.example.org/api",
            "token": "test_token",
            "timeout_secs": 10
        },
        "autosave": {
            "enabled": false,
            "interval_secs": 15,
            "teardown_grace_ms": 500
        },
        "permissions": {
            "role": "admin",
            "allowed_roles": ["admin"]
        }
    }"#;

    let config = ReviewConfig::from_json_str(json).expect("Failed to parse config");

    assert_eq!(config.gateway.kind, GatewayKind::Rest);
    assert_eq!(config.gateway.base_url.as_deref(), Some("https://mtr.example.org/api"), "url should map to base_url");
    assert_eq!(config.gateway.api_token.as_deref(), Some("test_token"), "token should map to api_token");
    assert_eq!(config.gateway.timeout(), Some(Duration::from_secs(10)));

    assert!(!config.autosave.enabled);
    assert_eq!(config.autosave.interval(), Duration::from_secs(15));
    assert_eq!(config.autosave.teardown_grace(), Duration::from_millis(500));

    assert_eq!(config.permissions.role, "admin");
    assert_eq!(config.permissions.allowed_roles, vec!["admin"]);
}

#[test]
fn test_parse_minimal_config() {
    let config = ReviewConfig::from_json_str("{}").expect("Failed to parse minimal config");

    assert_eq!(config.gateway.kind, GatewayKind::File, "Default gateway is the file store");
    assert_eq!(config.gateway.data_dir.to_str(), Some("./data/reviews"));
    assert_eq!(config.gateway.timeout(), Some(Duration::from_secs(30)));
    assert!(config.autosave.enabled);
    assert_eq!(config.autosave.interval(), Duration::from_secs(30));
    assert_eq!(config.autosave.teardown_grace(), Duration::from_secs(2));
    assert_eq!(config.permissions.role, "pharmacist");
    assert_eq!(config.permissions.allowed_roles, vec!["pharmacist", "admin"]);
}

#[test]
fn test_zero_timeout_disables_bound() {
    let config = ReviewConfig::from_json_str(r#"{ "gateway": { "timeout_secs": 0 } }"#).unwrap();
    assert_eq!(config.gateway.timeout(), None);
}

#[test]
fn test_validate_config() {
    let result = ReviewConfig::from_json_str(r#"{ "gateway": { "kind": "rest" } }"#);
    assert!(result.is_err(), "REST gateway without a base url must be rejected");
    assert!(result.unwrap_err().to_string().contains("required"));

    let result = ReviewConfig::from_json_str(r#"{ "autosave": { "interval_secs": 0 } }"#);
    assert!(result.is_err(), "Autosave interval of zero must be rejected");

    let result = ReviewConfig::from_json_str(r#"{ "permissions": { "role": "  " } }"#);
    assert!(result.is_err(), "Blank role must be rejected");
}

#[test]
fn test_load_from_file_with_env_overlay() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{ "gateway": {{ "data_dir": "/tmp/mtr-reviews" }}, "autosave": {{ "teardown_grace_ms": 1000 }} }}"#
    )
    .unwrap();

    std::env::set_var("MTR__AUTOSAVE__TEARDOWN_GRACE_MS", "250");
    let config = ReviewConfig::from_file(file.path());
    std::env::remove_var("MTR__AUTOSAVE__TEARDOWN_GRACE_MS");

    let config = config.expect("Failed to load config file");
    assert_eq!(config.gateway.data_dir.to_str(), Some("/tmp/mtr-reviews"));
    assert_eq!(config.autosave.teardown_grace(), Duration::from_millis(250), "environment overrides the file");
    assert_eq!(config.autosave.interval(), Duration::from_secs(30));
}

#[test]
fn test_missing_file_is_config_error() {
    let err = ReviewConfig::from_file("/definitely/not/here.json").unwrap_err();
    assert!(err.to_string().contains("not found"));
}
