use std::io::SeekFrom;
use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::{ClientError, ClientResult};
use super::WsStream;
use crate::proxy::{ByteRange, BUFFER_SIZE};

/// Answers range requests on one data connection until the worker closes
/// it.
pub(super) async fn respond(
    mut socket: WsStream,
    mut file: File,
    path: PathBuf,
    cancel: CancellationToken,
) -> ClientResult<()> {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            message = socket.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                let range = ByteRange::from_header(&text)
                    .filter(|range| range.len() <= BUFFER_SIZE)
                    .ok_or_else(|| ClientError::Protocol(format!("invalid range request '{text}'")))?;
                trace!(path = %path.display(), range = %range, "range requested");
                let mut buffer = vec![0u8; range.len() as usize];
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(ClientError::io(&path))?;
                file.read_exact(&mut buffer)
                    .await
                    .map_err(ClientError::io(&path))?;
                socket.send(Message::Binary(buffer)).await?;
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(ClientError::Protocol("unexpected binary message".into()));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}
