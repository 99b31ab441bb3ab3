//! Linux platform backend: cgroup-freezer based suspend/resume plus a
//! CRIU-style checkpoint/restore pair, satisfying `knhk_sync::PlatformProxy`.
//!
//! `map_resources`/`release` are best-effort cgroup-cpuset writes; actual
//! NUMA/affinity enforcement is platform- and kernel-version-specific and
//! is out of scope here (§1 lists the per-platform backend among external
//! collaborators consumed through a narrow interface).

use knhk_config::schema::LinuxPlatformProxyConfig;
use knhk_resources::ResourceAssignment;
use knhk_sync::{PlatformProxy, Result, SyncError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument, warn};

pub struct LinuxPlatformProxy {
    image_dir: PathBuf,
    freezer_dir: PathBuf,
}

impl LinuxPlatformProxy {
    pub fn new(config: &LinuxPlatformProxyConfig) -> Self {
        Self {
            image_dir: PathBuf::from(&config.image_dir),
            freezer_dir: PathBuf::from(&config.freezer_dir),
        }
    }

    fn cgroup_path(&self, uid: u32) -> PathBuf {
        self.freezer_dir.join(format!("exc-{uid}"))
    }

    fn checkpoint_path(&self, uid: u32) -> PathBuf {
        self.image_dir.join(format!("exc-{uid}"))
    }

    async fn write_freezer_state(&self, uid: u32, state: &str) -> Result<()> {
        let dir = self.cgroup_path(uid);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::PlatformMappingFailed(uid, e.to_string()))?;
        fs::write(dir.join("freezer.state"), state)
            .await
            .map_err(|e| SyncError::PlatformMappingFailed(uid, e.to_string()))
    }
}

#[async_trait]
impl PlatformProxy for LinuxPlatformProxy {
    #[instrument(skip(self, assignments))]
    async fn map_resources(&self, uid: u32, assignments: &[ResourceAssignment]) -> Result<()> {
        let dir = self.cgroup_path(uid);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::PlatformMappingFailed(uid, e.to_string()))?;
        let cpus: Vec<String> = assignments
            .iter()
            .flat_map(|a| a.bound_resources())
            .filter_map(|path| path.to_string().split('.').last().map(str::to_string))
            .collect();
        fs::write(dir.join("cpuset.cpus"), cpus.join(","))
            .await
            .map_err(|e| SyncError::PlatformMappingFailed(uid, e.to_string()))?;
        self.write_freezer_state(uid, "THAWED").await
    }

    #[instrument(skip(self))]
    async fn reclaim_resources(&self, uid: u32) -> Result<()> {
        self.write_freezer_state(uid, "FROZEN").await
    }

    #[instrument(skip(self))]
    async fn release(&self, uid: u32) -> Result<()> {
        let dir = self.cgroup_path(uid);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .await
                .map_err(|e| SyncError::PlatformMappingFailed(uid, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restore(&self, uid: u32) -> Result<()> {
        let checkpoint = self.checkpoint_path(uid);
        if !checkpoint.exists() {
            debug!(uid, "no checkpoint image, nothing to restore");
            return Ok(());
        }
        self.write_freezer_state(uid, "THAWED").await
    }

    #[instrument(skip(self))]
    async fn thaw(&self, uid: u32) -> Result<()> {
        self.write_freezer_state(uid, "THAWED").await
    }

    /// Re-reads platform-reported online/offline status. With no live
    /// topology source wired in, this is a no-op that always succeeds;
    /// a real deployment would re-walk `/sys/devices/system/cpu`.
    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<()> {
        if !self.freezer_dir.exists() {
            warn!(dir = %self.freezer_dir.display(), "freezer cgroup root missing");
        }
        Ok(())
    }

    #[instrument(skip(self, assignments))]
    async fn actuate_power(&self, uid: u32, assignments: &[ResourceAssignment]) -> Result<()> {
        for assignment in assignments {
            let settings = &assignment.power_settings;
            for path in assignment.bound_resources() {
                let Some(cpu) = path.to_string().split('.').last().map(str::to_string) else {
                    continue;
                };
                let cpufreq_dir = PathBuf::from("/sys/devices/system/cpu")
                    .join(&cpu)
                    .join("cpufreq");
                if let Some(governor) = &settings.governor {
                    if let Err(e) = fs::write(cpufreq_dir.join("scaling_governor"), governor).await {
                        debug!(uid, cpu = %cpu, error = %e, "failed to set scaling governor");
                    }
                }
                if let Some(freq) = settings.frequency_khz {
                    if let Err(e) = fs::write(cpufreq_dir.join("scaling_max_freq"), freq.to_string()).await {
                        debug!(uid, cpu = %cpu, error = %e, "failed to set scaling max frequency");
                    }
                }
                if let Some(state) = settings.perf_state {
                    if let Err(e) = fs::write(cpufreq_dir.join("perf_state"), state.to_string()).await {
                        debug!(uid, cpu = %cpu, error = %e, "failed to set performance state");
                    }
                }
            }
        }
        Ok(())
    }
}
