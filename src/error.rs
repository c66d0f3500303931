pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Terminal I/O failure: no leg was able to serve the request.
    #[error("I/O error")]
    Io,
    /// Read-ahead rejection; the upper layer can drop the request cheaply.
    #[error("operation would block")]
    WouldBlock,
    /// Discard/trim is best-effort and surfaced as-is.
    #[error("operation not supported")]
    Unsupported,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("too many mirror set instances loaded")]
    TooManyInstances,
    #[error("mirror data inconsistency at sector {sector}")]
    DataMismatch { sector: u64 },
    #[error("device error: {0}")]
    Device(#[from] std::io::Error),
    #[error("could not start mirror worker: {0}")]
    Worker(std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
