use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulingError>;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("schedulable {0} not found")]
    NotFound(u32),

    #[error("schedulable {0} is disabled")]
    Disabled(u32),

    #[error("schedulable {0} is blocking and cannot accept a new schedule request")]
    Blocking(u32),

    #[error("transition {from:?} -> {to:?} is not allowed for schedulable {uid}")]
    StateTransitionNotAllowed {
        uid: u32,
        from: crate::schedulable::StableState,
        to: crate::schedulable::StableState,
    },

    #[error("requested awm id {0} is out of bounds for the current resource constraints")]
    UsageOutOfBounds(u32),

    #[error(transparent)]
    Resource(#[from] knhk_resources::ResourceError),

    #[error("no scheduling policy is registered")]
    MissingPolicy,

    #[error("policy invocation failed: {0}")]
    PolicyFailed(String),

    #[error("policy requests the scheduling round be delayed")]
    PolicyDelayed,
}
