//! Narrow seam to the underlying platform (cgroups, NUMA, frequency
//! governors, ...). No concrete platform is implemented here; a Linux
//! proxy is expected to live alongside the daemon's composition root.

use crate::error::Result;
use async_trait::async_trait;
use knhk_resources::ResourceAssignment;

#[async_trait]
pub trait PlatformProxy: Send + Sync {
    /// Applies the concrete resource mapping (affinity, caps, power
    /// settings carried on each assignment) for a schedulable about to run.
    async fn map_resources(&self, uid: u32, assignments: &[ResourceAssignment]) -> Result<()>;

    /// Reclaims a mapping without tearing down the schedulable itself,
    /// used when a sync session aborts after Sync-Platform already ran.
    async fn reclaim_resources(&self, uid: u32) -> Result<()>;

    /// Fully releases platform-side state for a terminated schedulable.
    async fn release(&self, uid: u32) -> Result<()>;

    /// Restores a previously suspended schedulable's platform state.
    async fn restore(&self, uid: u32) -> Result<()>;

    /// Re-thaws a frozen schedulable ahead of resuming it.
    async fn thaw(&self, uid: u32) -> Result<()>;

    /// Re-reads platform-reported resource totals, used to reconcile the
    /// accounter after an online/offline event.
    async fn refresh(&self) -> Result<()>;

    /// Applies the governor/frequency/perf-state settings carried on each
    /// assignment for a schedulable that just left synchronization.
    async fn actuate_power(&self, uid: u32, assignments: &[ResourceAssignment]) -> Result<()>;
}
