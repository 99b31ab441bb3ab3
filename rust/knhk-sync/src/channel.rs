//! Narrow seam to the per-schedulable RTLib notification channel. No wire
//! transport is implemented here — see the daemon's `rtlib_proto` module
//! for the framed codec a concrete channel would sit on top of.

use crate::error::Result;
use async_trait::async_trait;

/// What the schedulable's runtime library reported back for the latency
/// of its own SyncChange handling.
#[derive(Debug, Clone, Copy)]
pub struct SyncLatencyReport {
    pub latency_ms: u64,
}

#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// BBQ_SYNCP_PRECHANGE: notify the schedulable of the upcoming AWM so
    /// it can prepare (e.g. pre-fault memory) before anything moves.
    async fn pre_change(&self, uid: u32) -> Result<()>;

    /// BBQ_SYNCP_SYNCCHANGE: notify the schedulable that the platform has
    /// been reconfigured; it reports back how long it took to adapt.
    async fn sync_change(&self, uid: u32) -> Result<SyncLatencyReport>;

    /// BBQ_SYNCP_DOCHANGE: release the schedulable to resume at its new
    /// working mode.
    async fn do_change(&self, uid: u32) -> Result<()>;

    /// BBQ_SYNCP_POSTCHANGE: informational, sent once the schedulable has
    /// settled into its committed (or aborted) state.
    async fn post_change(&self, uid: u32) -> Result<()>;
}
