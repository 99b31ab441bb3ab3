//! Sysfs-backed `PowerSource` and an Intel-RAPL-style `EnergySource`,
//! satisfying `knhk_power`'s platform read seams.

use async_trait::async_trait;
use knhk_power::{EnergySource, PowerError, PowerSource, Result};
use knhk_resources::{InfoKind, ResourcePath};
use std::path::PathBuf;
use tokio::fs;

/// Reads load/temperature/frequency/power from the usual Linux sysfs
/// locations, keyed by the resource path's last (type, id) level.
pub struct SysfsPowerSource {
    thermal_zone_root: PathBuf,
    cpufreq_root: PathBuf,
}

impl SysfsPowerSource {
    pub fn new() -> Self {
        Self {
            thermal_zone_root: PathBuf::from("/sys/class/thermal"),
            cpufreq_root: PathBuf::from("/sys/devices/system/cpu"),
        }
    }

    fn cpu_index(path: &ResourcePath) -> Option<String> {
        path.to_string()
            .split('.')
            .find(|seg| seg.starts_with("cpu"))
            .map(|seg| seg.trim_start_matches("cpu").to_string())
    }

    async fn read_first_line(path: &std::path::Path) -> Option<f64> {
        let content = fs::read_to_string(path).await.ok()?;
        content.trim().parse::<f64>().ok()
    }
}

impl Default for SysfsPowerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerSource for SysfsPowerSource {
    async fn read(&self, path: &ResourcePath, kind: InfoKind) -> Result<f64> {
        match kind {
            InfoKind::Temperature => {
                let zone = self.thermal_zone_root.join("thermal_zone0/temp");
                Self::read_first_line(&zone)
                    .await
                    .map(|millideg| millideg / 1000.0)
                    .ok_or_else(|| PowerError::SampleReadFailed(zone.display().to_string()))
            }
            InfoKind::Frequency => {
                let Some(idx) = Self::cpu_index(path) else {
                    return Err(PowerError::UnknownResource(path.to_string()));
                };
                let file = self
                    .cpufreq_root
                    .join(format!("cpu{idx}/cpufreq/scaling_cur_freq"));
                Self::read_first_line(&file)
                    .await
                    .ok_or_else(|| PowerError::SampleReadFailed(file.display().to_string()))
            }
            InfoKind::Load => {
                let loadavg = PathBuf::from("/proc/loadavg");
                Self::read_first_line(&loadavg)
                    .await
                    .ok_or_else(|| PowerError::SampleReadFailed(loadavg.display().to_string()))
            }
            InfoKind::Power | InfoKind::Energy => Err(PowerError::UnknownResource(path.to_string())),
        }
    }
}

/// Reads the monotonic Intel RAPL energy counter, in microjoules.
pub struct RaplEnergySource {
    counter_path: PathBuf,
}

impl RaplEnergySource {
    pub fn new(package: &str) -> Self {
        Self {
            counter_path: PathBuf::from(format!("/sys/class/powercap/{package}/energy_uj")),
        }
    }
}

#[async_trait]
impl EnergySource for RaplEnergySource {
    async fn read_counter_uj(&self) -> Result<u64> {
        let content = fs::read_to_string(&self.counter_path)
            .await
            .map_err(|e| PowerError::SampleReadFailed(e.to_string()))?;
        content
            .trim()
            .parse::<u64>()
            .map_err(|e| PowerError::SampleReadFailed(e.to_string()))
    }
}
