use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt LLR file: {0}")]
    CorruptSidecar(String),

    #[error("decoded to {actual} bytes (actual) instead of {expected} bytes (expected)")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{0}")]
    MissingPacket(String),

    #[error("corrupt file: hash mismatch")]
    HashMismatch,

    #[error("{op}: {message}")]
    External { op: &'static str, message: String },

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("{0}, probably a bug. halting!")]
    Bug(String),
}

impl Error {
    /// Wraps a failure coming out of the media layer, tagged with the
    /// operation that produced it.
    pub fn external(op: &'static str, message: impl Into<String>) -> Self {
        Error::External { op, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
