use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Unknown lock: {0}")]
    UnknownLock(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
