use thiserror::Error;

pub type Result<T> = std::result::Result<T, PowerError>;

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("no such resource registered for sampling: {0}")]
    UnknownResource(String),
    #[error("platform power-management interface read failed: {0}")]
    SampleReadFailed(String),
    #[error("an energy measurement bracket is already open")]
    BracketAlreadyOpen,
    #[error("no energy measurement bracket is open")]
    BracketNotOpen,
}
