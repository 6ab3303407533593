use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{WorkerError, WorkerResult};
use crate::args::ArgumentError;
use crate::proxy::{ByteRange, ChunkSource, ProxyError, ProxyResult, VirtualFile};
use crate::session::Session;

/// Upgrades a data connection for input `/{id}` of an existing session.
pub(super) fn accept(upgrade: WebSocketUpgrade, session: Arc<Session>, path: &str) -> WorkerResult<Response> {
    let id = Uuid::parse_str(path).map_err(|_| ArgumentError::InvalidInputId(path.to_string()))?;
    if session.inputs().contains(&id) {
        return Err(ArgumentError::Conflict { kind: "Input", id }.into());
    }
    Ok(upgrade.on_upgrade(move |socket| serve(socket, session, id)))
}

async fn serve(mut socket: WebSocket, session: Arc<Session>, id: Uuid) {
    let cancel = session.cancel_token().clone();
    let length = tokio::select! {
        _ = cancel.cancelled() => return,
        length = receive_length(&mut socket) => length,
    };
    let length = match length {
        Ok(length) => length,
        Err(err) if err.is_canceled() => return,
        Err(err) => {
            warn!(session = %session.id(), input = %id, error = %err, "input registration failed");
            let _ = socket.send(Message::Close(Some(CloseFrame {
                code: close_code::PROTOCOL,
                reason: "".into(),
            })))
            .await;
            return;
        }
    };

    let file = Arc::new(VirtualFile::new(length, Box::new(SocketChunkSource { socket })));
    if !session.inputs().insert(id, Arc::clone(&file)) {
        warn!(session = %session.id(), input = %id, "input ID conflicted");
        file.close().await;
        return;
    }
    debug!(session = %session.id(), input = %id, length, "input connected");

    tokio::select! {
        _ = session.exited().wait() => {}
        _ = cancel.cancelled() => {}
    }
    file.close().await;
    debug!(session = %session.id(), input = %id, "input disconnected");
}

/// First message of a data connection: the file length as JSON.
async fn receive_length(socket: &mut WebSocket) -> WorkerResult<u64> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => return Err(WorkerError::Protocol("binary message before length")),
            Some(Ok(Message::Close(_))) | None => return Err(WorkerError::Canceled),
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

/// Sends `bytes=from-to` and expects exactly one binary reply.
struct SocketChunkSource {
    socket: WebSocket,
}

#[async_trait]
impl ChunkSource for SocketChunkSource {
    async fn fetch(&mut self, range: ByteRange) -> ProxyResult<Bytes> {
        self.socket
            .send(Message::Text(range.to_string()))
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Binary(data))) => return Ok(Bytes::from(data)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Text(_))) => return Err(ProxyError::UnexpectedMessage("text")),
                Some(Ok(Message::Close(_))) | None => return Err(ProxyError::ChannelClosed),
                Some(Err(err)) => return Err(ProxyError::Transport(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self
            .socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            })))
            .await;
    }
}
