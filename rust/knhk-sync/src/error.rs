//! Errors raised while driving a schedulable through the commit protocol.

use knhk_resources::ResourceError;
use knhk_scheduling::SchedulingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("synchronization already in progress")]
    SyncInitFailed,
    #[error("view error during synchronization: {0}")]
    SyncViewError(#[from] ResourceError),
    #[error("no synchronization session is in progress")]
    SyncNotStarted,
    #[error("schedulable {0} has no pending working mode to sync")]
    SyncMissingAwm(u32),
    #[error("reported sync latency of {reported_ms}ms exceeds the {bound_ms}ms bound")]
    SyncLatencyExceeded { reported_ms: u64, bound_ms: u64 },
    #[error("platform synchronization failed for schedulable {0}: {1}")]
    PlatformSyncFailed(u32, String),
    #[error("rtlib channel timed out waiting for schedulable {0}")]
    ChannelTimeout(u32),
    #[error("rtlib channel write failed for schedulable {0}: {1}")]
    ChannelWriteFailed(u32, String),
    #[error("rtlib channel read failed for schedulable {0}: {1}")]
    ChannelReadFailed(u32, String),
    #[error("rtlib channel setup failed for schedulable {0}: {1}")]
    ChannelSetupFailed(u32, String),
    #[error("rtlib channel teardown failed for schedulable {0}: {1}")]
    ChannelTeardownFailed(u32, String),
    #[error("platform proxy failed to initialize: {0}")]
    PlatformInitFailed(String),
    #[error("platform proxy failed to load resource map: {0}")]
    PlatformLoadFailed(String),
    #[error("platform proxy failed to map resources for schedulable {0}: {1}")]
    PlatformMappingFailed(u32, String),
    #[error("platform proxy failed to apply power settings for schedulable {0}: {1}")]
    PlatformPowerSettingError(u32, String),
    #[error("platform proxy reliability check failed: {0}")]
    PlatformReliabilityFailed(String),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}
