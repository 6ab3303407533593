use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::future::join_all;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::cookie::SESSION_COOKIE;
use super::error::{WorkerError, WorkerResult};
use super::WorkerState;
use crate::args::{rewrite, validate, ArgumentError, RewriteContext, TranscoderCommand};
use crate::auth::Credentials;
use crate::session::{Session, SessionState};
use crate::staging::StagedOutput;
use crate::supervisor::{spawn_line_reader, supervise, LaunchedProcess, ProcessOutput};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Upgrades a control connection, which creates and owns a new session.
pub(super) fn accept(upgrade: WebSocketUpgrade, state: Arc<WorkerState>, credentials: Option<Credentials>) -> Response {
    upgrade.on_upgrade(move |socket| run(socket, state, credentials))
}

async fn run(mut socket: WebSocket, state: Arc<WorkerState>, credentials: Option<Credentials>) {
    let Some(guard) = Session::open(&state.sessions, &state.shutdown) else {
        error!("session ID conflicted");
        let _ = socket.send(close_frame(close_code::ERROR, "")).await;
        return;
    };
    let session = Arc::clone(guard.session());

    let command = match prepare(&mut socket, &state, &session, credentials.as_ref()).await {
        Ok(command) => command,
        Err(err) => return reject(&mut socket, &session, err).await,
    };
    let process = match state.launcher.launch(&command.args).await {
        Ok(process) => process,
        Err(err) => return reject(&mut socket, &session, err.into()).await,
    };
    run_process(socket, &state, &session, process).await;
    drop(guard);
}

/// Everything between the session cookie and process start.
async fn prepare(
    socket: &mut WebSocket,
    state: &WorkerState,
    session: &Session,
    credentials: Option<&Credentials>,
) -> WorkerResult<TranscoderCommand> {
    session.transition(SessionState::AwaitingArguments);
    socket
        .send(Message::Text(format!("{SESSION_COOKIE}={}", session.id())))
        .await?;

    let args = validate(receive_arguments(socket, session).await?)?;
    let context = RewriteContext {
        session: session.id(),
        loopback: &state.loopback,
        credentials,
        temp_dir: &state.temp_dir,
    };
    let command = rewrite(&args, &context)?;
    for target in &command.outputs {
        let output = Arc::new(StagedOutput::new(target.id, target.path.clone()));
        if !session.outputs().insert(target.id, output) {
            return Err(ArgumentError::Conflict { kind: "Output", id: target.id }.into());
        }
    }

    tokio::select! {
        waited = wait_for_inputs(session, &command.inputs, state.input_timeout) => waited?,
        err = peer_gone(socket) => return Err(err),
    }
    for id in session.inputs().keys() {
        if session.outputs().contains(&id) {
            return Err(ArgumentError::Conflict { kind: "Input", id }.into());
        }
    }
    debug!(session = %session.id(), args = ?command.args, "arguments accepted");
    Ok(command)
}

async fn receive_arguments(socket: &mut WebSocket, session: &Session) -> WorkerResult<Vec<Option<String>>> {
    loop {
        let message = tokio::select! {
            _ = session.cancel_token().cancelled() => return Err(WorkerError::Canceled),
            message = socket.recv() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|_| ArgumentError::Invalid.into());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => return Err(WorkerError::Protocol("binary message instead of arguments")),
            Some(Ok(Message::Close(_))) | None => return Err(WorkerError::Canceled),
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

/// Waits until every input named in the arguments has its data connection.
async fn wait_for_inputs(session: &Session, inputs: &[Uuid], limit: Duration) -> WorkerResult<()> {
    let deadline = tokio::time::Instant::now() + limit;
    for &id in inputs {
        let registered = tokio::time::timeout_at(deadline, session.inputs().wait_for(&id));
        tokio::select! {
            _ = session.cancel_token().cancelled() => return Err(WorkerError::Canceled),
            registered = registered => {
                registered.map_err(|_| ArgumentError::InputNotConnected(id))?;
            }
        }
    }
    Ok(())
}

/// Resolves once the caller hangs up or breaks protocol.
async fn peer_gone(socket: &mut WebSocket) -> WorkerError {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return WorkerError::Canceled,
            Some(Ok(_)) => return WorkerError::Protocol("message while waiting for inputs"),
            Some(Err(err)) => return err.into(),
        }
    }
}

async fn reject(socket: &mut WebSocket, session: &Session, err: WorkerError) {
    match err {
        err if err.is_canceled() => {
            debug!(session = %session.id(), "session canceled before start");
        }
        WorkerError::Argument(err) => {
            debug!(session = %session.id(), error = %err, "arguments rejected");
            let _ = socket.send(Message::Text(err.to_string())).await;
            let _ = socket.send(close_frame(close_code::NORMAL, "1")).await;
        }
        err => {
            error!(session = %session.id(), error = %err, "session failed");
            let _ = socket.send(close_frame(close_code::ERROR, "")).await;
        }
    }
}

async fn run_process(socket: WebSocket, state: &WorkerState, session: &Arc<Session>, process: LaunchedProcess) {
    let LaunchedProcess {
        stdin,
        stderr,
        mut handle,
    } = process;
    session.attach_stdin(stdin);
    session.transition(SessionState::Running);

    let (sink, stream) = socket.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    tokio::spawn(watch_control(stream, Arc::clone(session)));
    let mut relay = tokio::spawn(relay_stderr(stderr, Arc::clone(&sink), session.id()));

    let code = match supervise(handle.as_mut(), session.cancel_token()).await {
        Ok(code) => code,
        Err(err) => {
            error!(session = %session.id(), error = %err, "lost track of transcoder");
            session.exited().cancel();
            relay.abort();
            let _ = sink.lock().await.send(close_frame(close_code::ERROR, "")).await;
            return;
        }
    };
    session.exited().complete(code);
    session.transition(SessionState::AwaitingOutputs);
    debug!(session = %session.id(), code, "transcoder exited");

    if tokio::time::timeout(state.stderr_drain, &mut relay).await.is_err() {
        relay.abort();
    }
    let _ = sink
        .lock()
        .await
        .send(close_frame(close_code::NORMAL, code.to_string()))
        .await;

    if code == 0 && !session.is_canceled() {
        let outputs = session.outputs().values();
        let delivered = join_all(outputs.iter().map(|output| output.delivered().wait()));
        tokio::select! {
            _ = delivered => debug!(session = %session.id(), "outputs delivered"),
            _ = session.cancel_token().cancelled() => {}
        }
    }
}

/// Cancels the session once the caller closes the control connection.
async fn watch_control(mut stream: futures::stream::SplitStream<WebSocket>, session: Arc<Session>) {
    loop {
        let message = tokio::select! {
            _ = session.cancel_token().cancelled() => return,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                debug!(session = %session.id(), "control connection closed");
                session.cancel();
                return;
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Forwards standard-error lines; send failures are ignored so the pipe keeps
/// draining.
async fn relay_stderr(stderr: ProcessOutput, sink: SharedSink, session: Uuid) {
    let mut lines = spawn_line_reader(stderr);
    while let Some(line) = lines.recv().await {
        trace!(session = %session, line = %line, "transcoder");
        let _ = sink.lock().await.send(Message::Text(line)).await;
    }
}

fn close_frame(code: u16, reason: impl Into<Cow<'static, str>>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
