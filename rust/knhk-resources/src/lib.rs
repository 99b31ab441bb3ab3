//! Resource tree, path matching, and the versioned resource accounter.

pub mod accounter;
pub mod assignment;
pub mod error;
pub mod path;
pub mod resource;
pub mod view;

pub use accounter::{AccounterState, ResourceAccounter};
pub use assignment::{AssignmentMap, FillPolicy, PowerSettings, ResourceAssignment};
pub use error::{ResourceError, Result};
pub use path::{Class, CompareResult, ResourcePath, ResourceType, MAX_PATH_LEVELS};
pub use resource::{Ema, InfoKind, PowerProfile, Resource};
pub use view::{ResourceView, ViewToken, SYSTEM_VIEW};
