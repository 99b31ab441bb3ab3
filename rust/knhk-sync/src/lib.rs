//! Moves schedulables from a scheduling decision to a running system
//! through a platform and RTLib-notification commit protocol.

pub mod channel;
pub mod error;
pub mod manager;
pub mod platform;

pub use channel::{SyncChannel, SyncLatencyReport};
pub use error::{Result, SyncError};
pub use knhk_config::schema::{SyncLatencyMode, SyncOrdering};
pub use manager::SynchronizationManager;
pub use platform::PlatformProxy;
