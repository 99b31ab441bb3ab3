//! Environment variable overlay.
//!
//! Format: `RTRM_<SECTION>_<KEY>`, e.g. `RTRM_RESOURCEMANAGER_OPT_INTERVAL_MS`,
//! `RTRM_POWERMONITOR_PERIOD_MS`. Values override whatever the config file or
//! the built-in defaults set.

use crate::schema::{RtrmConfig, SyncLatencyMode, SyncOrdering};
use std::collections::BTreeMap;
use std::env;

pub fn load_env_overlay() -> BTreeMap<String, String> {
    let mut overlay = BTreeMap::new();
    for (key, value) in env::vars() {
        if let Some(rest) = key.strip_prefix("RTRM_") {
            overlay.insert(rest.to_lowercase(), value);
        }
    }
    overlay
}

/// Applies the `RTRM_*` overlay onto a loaded configuration.
///
/// Unknown keys are ignored; malformed numeric values are ignored rather
/// than rejected, matching the tolerant style of the file loader's defaults.
pub fn apply_env_overrides(config: &mut RtrmConfig, overlay: &BTreeMap<String, String>) {
    for (key, value) in overlay {
        match key.as_str() {
            "resourcemanager_opt_interval_ms" => {
                if let Ok(v) = value.parse() {
                    config.resource_manager.opt_interval_ms = v;
                }
            }
            "schedulermanager_policy" => {
                config.scheduler_manager.policy = value.clone();
            }
            "synchronizationmanager_ordering" => match value.as_str() {
                "forced" => config.synchronization_manager.ordering = SyncOrdering::Forced,
                "eager" => config.synchronization_manager.ordering = SyncOrdering::Eager,
                _ => {}
            },
            "synchronizationmanager_sync_latency_mode" => match value.as_str() {
                "advisory" => {
                    config.synchronization_manager.sync_latency_mode = SyncLatencyMode::Advisory
                }
                "strict" => {
                    config.synchronization_manager.sync_latency_mode = SyncLatencyMode::Strict
                }
                _ => {}
            },
            "synchronizationmanager_rpc_timeout_ms" => {
                if let Ok(v) = value.parse() {
                    config.synchronization_manager.rpc_timeout_ms = v;
                }
            }
            "applicationmanager_max_schedulables" => {
                if let Ok(v) = value.parse() {
                    config.application_manager.max_schedulables = v;
                }
            }
            "linuxplatformproxy_image_dir" => {
                config.linux_platform_proxy.image_dir = value.clone();
            }
            "linuxplatformproxy_freezer_dir" => {
                config.linux_platform_proxy.freezer_dir = value.clone();
            }
            "powermonitor_period_ms" => {
                if let Ok(v) = value.parse() {
                    config.power_monitor.period_ms = v;
                }
            }
            "powermonitor_nr_threads" => {
                if let Ok(v) = value.parse() {
                    config.power_monitor.nr_threads = v;
                }
            }
            "powermonitor_temp_threshold_high" => {
                if let Ok(v) = value.parse() {
                    config.power_monitor.temp.threshold_high = v;
                }
            }
            "powermonitor_temp_threshold_low" => {
                if let Ok(v) = value.parse() {
                    config.power_monitor.temp.threshold_low = v;
                }
            }
            "powermonitor_temp_margin" => {
                if let Ok(v) = value.parse() {
                    config.power_monitor.temp.margin = v;
                }
            }
            "energymonitor_sampling_period_ms" => {
                if let Ok(v) = value.parse() {
                    config.energy_monitor.sampling_period_ms = v;
                }
            }
            "logging_enabled" => {
                if let Ok(v) = value.parse() {
                    config.logging.enabled = v;
                }
            }
            "logging_dir" => {
                config.logging.dir = Some(value.clone());
            }
            _ => {}
        }
    }
}
