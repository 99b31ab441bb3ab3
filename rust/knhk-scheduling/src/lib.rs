//! Schedulable lifecycle, application/process registries, and the
//! scheduler-manager contract.

pub mod error;
pub mod manager;
pub mod scheduler_manager;
pub mod schedulable;
pub mod working_mode;

pub use error::{Result, SchedulingError};
pub use manager::{ApplicationManager, SchedulableSnapshot};
pub use scheduler_manager::{PolicyContext, PolicyOutcome, SchedulerManager, SchedulerState, SchedulingPolicy};
pub use schedulable::{uid_of, Language, RuntimeProfile, Schedulable, StableState, SyncState};
pub use working_mode::WorkingMode;
