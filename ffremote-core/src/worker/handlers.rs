use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::cookie::{query_param, session_id};
use super::error::{WorkerError, WorkerResult};
use super::{control, data, WorkerState};
use crate::args::{is_print_option, is_unsupported_option, split_placeholder, ArgumentError};
use crate::auth::Credentials;
use crate::proxy::{ProxyError, RangeSpec};
use crate::session::Session;
use crate::signal::Outcome;

/// Single entry point. Requests are told apart by upgrade, session cookie,
/// method and path rather than by route.
pub(super) async fn dispatch(
    State(state): State<Arc<WorkerState>>,
    upgrade: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let query = request.uri().query().map(str::to_owned);
    let path = request.uri().path().trim_start_matches('/').to_owned();
    let session = session_id(request.headers(), query.as_deref())
        .and_then(|id| state.sessions.get(&id));

    if let Some(upgrade) = upgrade {
        return match session {
            Some(session) => data::accept(upgrade, session, &path).unwrap_or_else(IntoResponse::into_response),
            None => {
                let credentials = request.extensions().get::<Credentials>().cloned();
                control::accept(upgrade, state, credentials)
            }
        };
    }

    let method = request.method().clone();
    let result = match method {
        Method::GET => match session {
            Some(session) => read(session, &path, request.headers()).await,
            None => match query_param(query.as_deref(), "q") {
                Some(options) if path.is_empty() => print(&state, &options).await,
                _ => Err(WorkerError::SessionNotFound),
            },
        },
        Method::PUT => match session {
            Some(session) => write_stdin(session, request.into_body()).await,
            None => Err(WorkerError::SessionNotFound),
        },
        _ => Err(WorkerError::MethodNotAllowed),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// `GET /{id}{ext}`: a range of an input, or a whole finished output.
async fn read(session: Arc<Session>, path: &str, headers: &HeaderMap) -> WorkerResult<Response> {
    let (id, _) = split_placeholder(path).ok_or(WorkerError::NotFound)?;
    if let Some(file) = session.inputs().get(&id) {
        let length = file.len();
        let range = headers
            .get(RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(RangeSpec::parse)
            .and_then(|spec| spec.resolve(length))
            .ok_or(ProxyError::RangeNotSatisfiable { length })?;
        debug!(session = %session.id(), input = %id, range = %range, "range read");
        let body = Body::from_stream(file.stream(range, session.cancel_token().clone()));
        return Ok(Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(ACCEPT_RANGES, "bytes")
            .header(CONTENT_RANGE, range.content_range(length))
            .header(CONTENT_LENGTH, range.len())
            .body(body)?);
    }
    if let Some(output) = session.outputs().get(&id) {
        if session.exited().peek() != Some(Outcome::Completed(0)) {
            return Err(WorkerError::NotFound);
        }
        let (length, stream) = output.open().await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => WorkerError::NotFound,
            _ => WorkerError::Io(err),
        })?;
        debug!(session = %session.id(), output = %id, length, "output download");
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::from_stream(stream))?);
    }
    Err(WorkerError::NotFound)
}

/// `PUT /`: copies the body into the transcoder's standard input.
async fn write_stdin(session: Arc<Session>, body: Body) -> WorkerResult<Response> {
    if session.exited().is_settled() {
        return Err(WorkerError::NotFound);
    }
    let Some(mut stdin) = session.stdin().await else {
        return Err(WorkerError::NotFound);
    };
    let cancel = session.cancel_token().clone();
    let mut chunks = body.into_data_stream();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(WorkerError::Canceled),
            chunk = chunks.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        stdin.write_all(&chunk?).await?;
        stdin.flush().await?;
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

/// `GET /?q=...`: runs a print-only command and returns `[stdout, stderr]`.
async fn print(state: &WorkerState, options: &str) -> WorkerResult<Response> {
    let args: Vec<String> = options.split_whitespace().map(str::to_owned).collect();
    if !args.iter().any(|arg| is_print_option(arg)) {
        return Err(WorkerError::BadRequest("query carries no print option".into()));
    }
    if let Some(option) = args.iter().find(|arg| arg.starts_with('-') && is_unsupported_option(arg)) {
        return Err(ArgumentError::Unsupported(option.trim_start_matches('-').to_string()).into());
    }
    let captured = state.launcher.capture(&args).await?;
    debug!(code = captured.code, "print query finished");
    Ok(Json([captured.stdout, captured.stderr]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionGuard, SessionTable};
    use crate::staging::StagedOutput;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn staged(table: &Arc<SessionTable>, dir: &std::path::Path) -> (SessionGuard, String) {
        let guard = Session::open(table, &CancellationToken::new()).unwrap();
        let id = Uuid::new_v4();
        let path = dir.join(format!("{id}.mkv"));
        std::fs::write(&path, b"encoded").unwrap();
        assert!(guard.outputs().insert(id, Arc::new(StagedOutput::new(id, path))));
        (guard, format!("{id}.mkv"))
    }

    #[tokio::test]
    async fn outputs_are_served_only_after_a_clean_exit() {
        let dir = tempdir().unwrap();
        let table = Arc::new(SessionTable::new());
        let headers = HeaderMap::new();

        let (failed, placeholder) = staged(&table, dir.path());
        let session = Arc::clone(failed.session());
        let running = read(Arc::clone(&session), &placeholder, &headers).await;
        assert!(matches!(running, Err(WorkerError::NotFound)));
        session.exited().complete(3);
        let after_failure = read(session, &placeholder, &headers).await;
        assert!(matches!(after_failure, Err(WorkerError::NotFound)));

        let (finished, placeholder) = staged(&table, dir.path());
        finished.exited().complete(0);
        let response = read(Arc::clone(finished.session()), &placeholder, &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "7");
    }

    #[tokio::test]
    async fn sessions_cannot_read_each_others_files() {
        let dir = tempdir().unwrap();
        let table = Arc::new(SessionTable::new());
        let (owner, placeholder) = staged(&table, dir.path());
        owner.exited().complete(0);
        let (stranger, _) = staged(&table, dir.path());
        stranger.exited().complete(0);

        let result = read(Arc::clone(stranger.session()), &placeholder, &HeaderMap::new()).await;
        assert!(matches!(result, Err(WorkerError::NotFound)));
        assert!(dir.path().join(&placeholder).exists());
    }
}
