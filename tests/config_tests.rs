use chrono::Duration;
use loopguard::config::{ConfigError, GuardConfig};
use loopguard::remote::OverrideDuration;
use std::fs;

const FULL_CONFIG: &str = r#"{
    "rules": {
        "maximum_bolus": 6.5,
        "max_carb_entry_quantity": 200.0,
        "default_absorption_time": 10800,
        "min_absorption_time": 1800,
        "max_absorption_time": 28800,
        "max_carb_entry_past_time": -43200,
        "max_carb_entry_future_time": 3600,
        "allowed_override_presets": [
            {
                "name": "Running",
                "symbol": "🏃",
                "settings": { "target_range": [150.0, 170.0], "insulin_needs_scale_factor": 0.6 },
                "duration": { "kind": "finite", "seconds": 3600 }
            },
            { "name": "Sleep", "duration": { "kind": "indefinite" } }
        ],
        "max_override_duration_time": 86400
    },
    "time_monitor": {
        "acceptable_time_delta_secs": 90.0,
        "ntp_server": "time.example.net:123",
        "ntp_timeout_ms": 2500,
        "offset_store_path": "/var/lib/loopguard/time_trust.json"
    }
}"#;

#[test]
fn test_full_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guard.json");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = GuardConfig::load(&path).unwrap();

    assert_eq!(config.rules.maximum_bolus, Some(6.5));
    assert_eq!(config.rules.max_carb_entry_quantity, 200.0);
    assert_eq!(config.rules.max_absorption_time, Duration::hours(8));
    assert_eq!(config.rules.max_carb_entry_past_time, Duration::hours(-12));
    assert_eq!(config.rules.allowed_override_presets.len(), 2);

    let running = config.rules.find_preset("Running").unwrap();
    assert_eq!(running.duration, OverrideDuration::Finite(Duration::hours(1)));
    assert_eq!(running.settings.target_range, Some((150.0, 170.0)));
    assert_eq!(
        config.rules.find_preset("Sleep").unwrap().duration,
        OverrideDuration::Indefinite
    );

    assert_eq!(config.time_monitor.acceptable_time_delta_secs, 90.0);
    assert_eq!(config.time_monitor.ntp_server, "time.example.net:123");
    assert_eq!(config.time_monitor.ntp_timeout().as_millis(), 2500);
    // Unset fields keep their defaults
    assert_eq!(config.time_monitor.reference_max_age_secs, 300);
    assert_eq!(config.time_monitor.loop_interval_secs, 300);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = GuardConfig::load(dir.path().join("absent.json"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(
        GuardConfig::from_json("{ \"rules\": "),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_inconsistent_rules_rejected() {
    let inverted_absorption = r#"{"rules": {"min_absorption_time": 36000, "max_absorption_time": 1800}}"#;
    assert!(matches!(
        GuardConfig::from_json(inverted_absorption),
        Err(ConfigError::Invalid(_))
    ));

    let non_positive_bolus = r#"{"rules": {"maximum_bolus": 0.0}}"#;
    assert!(matches!(
        GuardConfig::from_json(non_positive_bolus),
        Err(ConfigError::Invalid(_))
    ));

    let positive_past_window = r#"{"rules": {"max_carb_entry_past_time": 600}}"#;
    assert!(matches!(
        GuardConfig::from_json(positive_past_window),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_huge_carb_window_rejected() {
    for json in [
        r#"{"rules": {"max_carb_entry_future_time": 100000000000000}}"#,
        r#"{"rules": {"max_carb_entry_past_time": -100000000000000}}"#,
    ] {
        assert!(matches!(GuardConfig::from_json(json), Err(ConfigError::Invalid(_))));
    }
}

#[test]
fn test_zero_timeout_and_interval_rejected() {
    for json in [
        r#"{"time_monitor": {"ntp_timeout_ms": 0}}"#,
        r#"{"time_monitor": {"loop_interval_secs": 0}}"#,
    ] {
        assert!(matches!(GuardConfig::from_json(json), Err(ConfigError::Invalid(_))));
    }
}
