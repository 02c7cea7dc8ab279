use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Batch of {count} commands exceeds the hard cap of {cap}")]
    BatchTooLarge { count: usize, cap: usize },

    #[error("Batch contains no commands")]
    EmptyBatch,

    #[error("State file error: {0}")]
    StateIo(#[from] std::io::Error),

    #[error("State decode error: {0}")]
    StateDecode(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
