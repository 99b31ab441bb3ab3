use knhk_config::config::load_from_file;
use knhk_config::{apply_env_overrides, load_env_overlay, validate_config, RtrmConfig};
use std::fs;

#[test]
fn loads_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("rtrm.toml");
    fs::write(
        &config_file,
        r#"
        [scheduler_manager]
        policy = "priority_first"

        [power_monitor]
        period_ms = 250
        "#,
    )
    .unwrap();

    let config = load_from_file(&config_file).expect("should load config");
    assert_eq!(config.scheduler_manager.policy, "priority_first");
    assert_eq!(config.power_monitor.period_ms, 250);
}

#[test]
fn env_var_overrides_file_value() {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("rtrm.toml");
    fs::write(
        &config_file,
        r#"
        [resource_manager]
        opt_interval_ms = 1000
        "#,
    )
    .unwrap();

    let mut config = load_from_file(&config_file).expect("should load config");
    std::env::set_var("RTRM_RESOURCEMANAGER_OPT_INTERVAL_MS", "250");
    let overlay = load_env_overlay();
    apply_env_overrides(&mut config, &overlay);
    std::env::remove_var("RTRM_RESOURCEMANAGER_OPT_INTERVAL_MS");

    assert_eq!(config.resource_manager.opt_interval_ms, 250);
}

#[test]
fn default_config_is_internally_consistent() {
    let config = RtrmConfig::default();
    assert!(validate_config(&config).is_ok());
    assert_eq!(config.application_manager.max_schedulables, 4096);
}

#[test]
fn malformed_toml_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("rtrm.toml");
    fs::write(&config_file, "not valid [[ toml").unwrap();

    let result = load_from_file(&config_file);
    assert!(result.is_err());
}
