//! Integration tests for configuration loading

use intersection_signal::domain::types::Direction;
use intersection_signal::infra::Config;
use std::fs;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_load_config_with_lane_file() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lanes.json"),
        r#"{
            "rate_window_s": 45,
            "approaches": [
                {"name": "Norte", "count_lines": [{"p1": [0, 40], "p2": [200, 40], "dir": "down"}]},
                {"count_lines": [{"p1": [300, 0], "p2": [300, 200]}]}
            ],
            "zones": [{"name": "ignored"}]
        }"#,
    )
    .unwrap();

    let config_path = dir.path().join("site.toml");
    fs::write(
        &config_path,
        r#"
[site]
id = "test-site"

[lanes]
file = "lanes.json"

[control]
min_green = 10
max_green = 40
clearance = 3
fixed_red = 8
fallback_phase = "Norte"

[metrics]
interval_secs = 15
"#,
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.rate_window_s(), 45);
    assert_eq!(config.approaches(), &["Norte".to_string(), "AP".to_string()]);
    assert_eq!(config.count_lines().len(), 2);
    assert_eq!(config.count_lines()[0].direction, Some(Direction::Down));
    assert_eq!(config.count_lines()[1].direction, None);
    assert_eq!(config.min_green(), 10);
    assert_eq!(config.max_green(), 40);
    assert_eq!(config.clearance(), 3);
    assert_eq!(config.fixed_red(), 8);
    assert_eq!(config.green_extension(), 3);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_missing_lane_file_is_fatal() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[lanes]\nfile = \"/nonexistent/lanes.json\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("lanes.json"));
}

#[test]
fn test_invalid_bounds_are_fatal() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[[lanes.approaches]]
name = "A"
count_lines = [{ p1 = [0.0, 0.0], p2 = [10.0, 0.0] }]

[control]
min_green = 30
max_green = 20
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("max_green"));
}

#[test]
fn test_shipped_dev_config_is_valid() {
    let config = Config::from_file("config/dev.toml").unwrap();

    assert_eq!(config.site_id(), "dev-intersection");
    assert_eq!(config.approaches().len(), 3);
    assert_eq!(config.fallback_phase(), "Norte");
    assert_eq!(config.labels().resolve(2), "car");
    assert_eq!(config.labels().resolve(42), "42");
    assert_eq!(config.track_idle_timeout_secs(), 120);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");

    assert_eq!(config.config_file(), "default");
    assert_eq!(config.approaches(), &["Principal".to_string()]);
    assert_eq!(config.min_green(), 12);
    assert_eq!(config.max_green(), 60);
}
