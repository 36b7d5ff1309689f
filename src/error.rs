//! Error type for the BDIO reader/writer.

/// Everything that can go wrong operating on a [`crate::Bdio`] stream.
#[derive(Debug, thiserror::Error)]
pub enum BdioError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol info {given:?} does not match file's {expected:?}")]
    ProtocolMismatch { expected: String, given: String },

    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("corrupted header: {0}")]
    CorruptedHeader(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stream state for this operation: {0}")]
    State(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

pub type Result<T> = std::result::Result<T, BdioError>;
