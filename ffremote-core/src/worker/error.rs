use axum::http::header::{CONTENT_RANGE, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::args::ArgumentError;
use crate::proxy::ProxyError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("session not found")]
    SessionNotFound,
    #[error("not found")]
    NotFound,
    #[error("operation canceled")]
    Canceled,
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid credentials")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection error: {0}")]
    Connection(#[from] axum::Error),
    #[error("response error: {0}")]
    Http(#[from] axum::http::Error),
    #[error("invalid loopback address: {0}")]
    Loopback(#[from] url::ParseError),
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

impl WorkerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Argument(ArgumentError::StandardStream) => StatusCode::NOT_IMPLEMENTED,
            Self::Argument(_) | Self::Json(_) | Self::BadRequest(_) | Self::Protocol(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Proxy(ProxyError::RangeNotSatisfiable { .. }) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Proxy(ProxyError::Canceled) | Self::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            Self::SessionNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller gave up or the host is shutting down.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::Proxy(ProxyError::Canceled))
    }
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Unauthorized => {
                return (status, [(WWW_AUTHENTICATE, "Basic")], self.to_string()).into_response();
            }
            Self::Proxy(ProxyError::RangeNotSatisfiable { length }) => {
                let range = format!("bytes */{length}");
                return (status, [(CONTENT_RANGE, range)], self.to_string()).into_response();
            }
            _ => {}
        }
        if status.is_server_error() && !self.is_canceled() {
            error!(error = %self, "request failed");
            return (status, "Internal Server Error").into_response();
        }
        if status.is_client_error() && status != StatusCode::NOT_FOUND {
            warn!(status = %status, error = %self, "rejected request");
        }
        (status, self.to_string()).into_response()
    }
}
