use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("range not satisfiable for length {length}")]
    RangeNotSatisfiable { length: u64 },
    #[error("expected {expected} bytes, received {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("unexpected {0} message on data connection")]
    UnexpectedMessage(&'static str),
    #[error("data connection closed")]
    ChannelClosed,
    #[error("operation canceled")]
    Canceled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Errors raised mid-exchange, after which the data connection can no
    /// longer be trusted.
    pub fn breaks_channel(&self) -> bool {
        !matches!(self, Self::RangeNotSatisfiable { .. })
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
