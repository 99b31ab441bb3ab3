//! Configuration loading: env > file > defaults.

use crate::env::{apply_env_overrides, load_env_overlay};
use crate::schema::{ConfigError, RtrmConfig};
use std::path::PathBuf;

pub fn load_config() -> Result<RtrmConfig, ConfigError> {
    let config_file = get_config_file_path()?;

    let mut config = if config_file.exists() {
        load_from_file(&config_file)?
    } else {
        RtrmConfig::default()
    };

    let overlay = load_env_overlay();
    apply_env_overrides(&mut config, &overlay);

    validate_config(&config)?;
    Ok(config)
}

pub fn load_from_file(path: &PathBuf) -> Result<RtrmConfig, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

pub fn get_config_file_path() -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var("RTRM_CONFIG_FILE") {
        return Ok(PathBuf::from(explicit));
    }
    let mut path = PathBuf::from("/etc/rtrm");
    path.push("rtrm.toml");
    Ok(path)
}

pub fn validate_config(config: &RtrmConfig) -> Result<(), ConfigError> {
    if config.resource_manager.opt_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "resource_manager.opt_interval_ms must be > 0".to_string(),
        ));
    }
    if config.power_monitor.period_ms == 0 {
        return Err(ConfigError::ValidationError(
            "power_monitor.period_ms must be > 0".to_string(),
        ));
    }
    if config.energy_monitor.sampling_period_ms == 0 {
        return Err(ConfigError::ValidationError(
            "energy_monitor.sampling_period_ms must be > 0".to_string(),
        ));
    }
    for (name, trigger) in [
        ("power_monitor.temp", &config.power_monitor.temp),
        ("power_monitor.power", &config.power_monitor.power),
        ("energy_monitor.batt_curr", &config.energy_monitor.batt_curr),
        (
            "energy_monitor.batt_charge",
            &config.energy_monitor.batt_charge,
        ),
    ] {
        if !(0.0..1.0).contains(&trigger.margin) {
            return Err(ConfigError::ValidationError(format!(
                "{name}.margin must be in [0, 1), got {}",
                trigger.margin
            )));
        }
    }
    if config.application_manager.max_schedulables == 0 {
        return Err(ConfigError::ValidationError(
            "application_manager.max_schedulables must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = RtrmConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_opt_interval_is_rejected() {
        let mut config = RtrmConfig::default();
        config.resource_manager.opt_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn out_of_range_margin_is_rejected() {
        let mut config = RtrmConfig::default();
        config.power_monitor.temp.margin = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn load_from_file_roundtrips_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtrm.toml");
        std::fs::write(
            &path,
            r#"
            [resource_manager]
            opt_interval_ms = 750

            [scheduler_manager]
            policy = "round_robin"
            "#,
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.resource_manager.opt_interval_ms, 750);
        assert_eq!(config.scheduler_manager.policy, "round_robin");
    }
}
