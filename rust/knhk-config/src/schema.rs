//! Configuration schema for the resource manager daemon.
//!
//! Section names mirror the daemon's component names so that a key read
//! from `[SchedulerManager]` in the config file maps directly onto
//! `RtrmConfig::scheduler_manager`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtrmConfig {
    #[serde(default)]
    pub resource_manager: ResourceManagerConfig,
    #[serde(default)]
    pub scheduler_manager: SchedulerManagerConfig,
    #[serde(default)]
    pub synchronization_manager: SynchronizationManagerConfig,
    #[serde(default)]
    pub application_manager: ApplicationManagerConfig,
    #[serde(default)]
    pub linux_platform_proxy: LinuxPlatformProxyConfig,
    #[serde(default)]
    pub power_monitor: PowerMonitorConfig,
    #[serde(default)]
    pub energy_monitor: EnergyMonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RtrmConfig {
    fn default() -> Self {
        Self {
            resource_manager: ResourceManagerConfig::default(),
            scheduler_manager: SchedulerManagerConfig::default(),
            synchronization_manager: SynchronizationManagerConfig::default(),
            application_manager: ApplicationManagerConfig::default(),
            linux_platform_proxy: LinuxPlatformProxyConfig::default(),
            power_monitor: PowerMonitorConfig::default(),
            energy_monitor: EnergyMonitorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceManagerConfig {
    #[serde(default = "default_opt_interval")]
    pub opt_interval_ms: u64,
}

fn default_opt_interval() -> u64 {
    2000
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            opt_interval_ms: default_opt_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerManagerConfig {
    #[serde(default = "default_policy")]
    pub policy: String,
}

fn default_policy() -> String {
    "default".to_string()
}

impl Default for SchedulerManagerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
        }
    }
}

/// Sync-latency enforcement mode resolving Open Question (b): the client-reported
/// sync latency can be treated as a hint or as a hard bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLatencyMode {
    Advisory,
    Strict,
}

/// Resolves Open Question (c): forced-vs-eager phase ordering is a runtime
/// knob rather than a build-time switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOrdering {
    Forced,
    Eager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizationManagerConfig {
    #[serde(default = "default_sync_ordering")]
    pub ordering: SyncOrdering,
    #[serde(default = "default_latency_mode")]
    pub sync_latency_mode: SyncLatencyMode,
    #[serde(default = "default_cfs_margin")]
    pub cfs_bandwidth_margin_pct: u8,
    #[serde(default = "default_cfs_threshold")]
    pub cfs_bandwidth_threshold_pct: u8,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_sync_ordering() -> SyncOrdering {
    SyncOrdering::Forced
}

fn default_latency_mode() -> SyncLatencyMode {
    SyncLatencyMode::Advisory
}

fn default_cfs_margin() -> u8 {
    10
}

fn default_cfs_threshold() -> u8 {
    90
}

fn default_rpc_timeout() -> u64 {
    5000
}

impl Default for SynchronizationManagerConfig {
    fn default() -> Self {
        Self {
            ordering: default_sync_ordering(),
            sync_latency_mode: default_latency_mode(),
            cfs_bandwidth_margin_pct: default_cfs_margin(),
            cfs_bandwidth_threshold_pct: default_cfs_threshold(),
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationManagerConfig {
    #[serde(default = "default_max_schedulables")]
    pub max_schedulables: u64,
}

fn default_max_schedulables() -> u64 {
    4096
}

impl Default for ApplicationManagerConfig {
    fn default() -> Self {
        Self {
            max_schedulables: default_max_schedulables(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinuxPlatformProxyConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(default = "default_freezer_dir")]
    pub freezer_dir: String,
}

fn default_image_dir() -> String {
    "/var/lib/rtrm/checkpoints".to_string()
}

fn default_freezer_dir() -> String {
    "/sys/fs/cgroup/freezer/rtrm".to_string()
}

impl Default for LinuxPlatformProxyConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            freezer_dir: default_freezer_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdTriggerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threshold_high: f64,
    #[serde(default)]
    pub threshold_low: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_margin() -> f64 {
    0.1
}

impl Default for ThresholdTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_high: 0.0,
            threshold_low: 0.0,
            margin: default_margin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerMonitorConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_nr_threads")]
    pub nr_threads: u32,
    #[serde(default)]
    pub temp: ThresholdTriggerConfig,
    #[serde(default)]
    pub power: ThresholdTriggerConfig,
}

fn default_period_ms() -> u64 {
    1000
}

fn default_nr_threads() -> u32 {
    1
}

impl Default for PowerMonitorConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            nr_threads: default_nr_threads(),
            temp: ThresholdTriggerConfig::default(),
            power: ThresholdTriggerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyMonitorConfig {
    #[serde(default = "default_sampling_period")]
    pub sampling_period_ms: u64,
    #[serde(default)]
    pub batt_curr: ThresholdTriggerConfig,
    #[serde(default)]
    pub batt_charge: ThresholdTriggerConfig,
}

fn default_sampling_period() -> u64 {
    5000
}

impl Default for EnergyMonitorConfig {
    fn default() -> Self {
        Self {
            sampling_period_ms: default_sampling_period(),
            batt_curr: ThresholdTriggerConfig::default(),
            batt_charge: ThresholdTriggerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
}

fn default_log_enabled() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: default_log_enabled(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {0}")]
    FileNotFound(String),
    #[error("failed to parse configuration: {0}")]
    ParseError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("io error: {0}")]
    IoError(String),
}
