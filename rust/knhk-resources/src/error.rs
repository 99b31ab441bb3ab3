use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResourceError>;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("malformed resource path: {0}")]
    InvalidPath(String),

    #[error("resource type {0:?} already present in path")]
    TypeAlreadyUsed(String),

    #[error("no resource found at path {0}")]
    NoSuchResource(String),

    #[error("capacity update would shrink below the amount already reserved")]
    Overflow,

    #[error("requested amount exceeds availability in view {view}: requested {requested}, available {available}")]
    UsageExceeded {
        view: u64,
        requested: u64,
        available: u64,
    },

    #[error("application/process {uid} already holds resources in view {view}")]
    AppAlreadyHoldsResources { uid: u32, view: u64 },

    #[error("view {0} is not known to the accounter")]
    UnknownView(u64),

    #[error("view {0} cannot be mutated directly: it is the system view")]
    UnauthorizedViewOp(u64),

    #[error("a synchronization session is already in progress")]
    SyncAlreadyInProgress,

    #[error("no synchronization session is in progress")]
    SyncNotStarted,
}
