use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::args::ArgumentError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error at {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
    #[error("{0}")]
    Protocol(String),
    #[error("worker failed to run the command")]
    Worker,
    #[error("connection to worker lost")]
    Disconnected,
    #[error("timed out connecting to worker")]
    Timeout,
    #[error("canceled")]
    Canceled,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { source, path }
    }
}
