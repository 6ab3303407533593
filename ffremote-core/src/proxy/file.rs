use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ProxyError, ProxyResult};
use super::range::ByteRange;

/// Size of each request/response exchange on a data connection.
pub const BUFFER_SIZE: u64 = 64 * 1024;

/// The remote end of a data connection: answers one range with exactly that
/// many bytes.
#[async_trait]
pub trait ChunkSource: Send {
    async fn fetch(&mut self, range: ByteRange) -> ProxyResult<Bytes>;

    async fn close(&mut self) {}
}

struct Channel {
    source: Box<dyn ChunkSource>,
    broken: bool,
}

/// A caller-side file readable by range on the worker.
///
/// The data connection carries one request/response pair at a time, so every
/// exchange happens while holding `channel`. Concurrent range reads queue on
/// the lock instead of interleaving on the wire.
pub struct VirtualFile {
    length: u64,
    channel: Mutex<Channel>,
}

impl VirtualFile {
    pub fn new(length: u64, source: Box<dyn ChunkSource>) -> Self {
        Self {
            length,
            channel: Mutex::new(Channel {
                source,
                broken: false,
            }),
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Fetches one chunk. `range` must lie inside the declared length.
    pub async fn read_chunk(
        &self,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> ProxyResult<Bytes> {
        if range.end >= self.length {
            return Err(ProxyError::RangeNotSatisfiable {
                length: self.length,
            });
        }
        let mut channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProxyError::Canceled),
            channel = self.channel.lock() => channel,
        };
        if channel.broken {
            return Err(ProxyError::ChannelClosed);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProxyError::Canceled),
            fetched = channel.source.fetch(range) => fetched,
        };
        let result = fetched.and_then(|data| {
            let actual = data.len() as u64;
            if actual == range.len() {
                Ok(data)
            } else {
                Err(ProxyError::LengthMismatch {
                    expected: range.len(),
                    actual,
                })
            }
        });
        if let Err(err) = &result {
            if err.breaks_channel() {
                channel.broken = true;
            }
        }
        result
    }

    /// Streams `range` chunk by chunk from a background task. The task stops
    /// after the current chunk once the receiver is dropped.
    pub fn stream(
        self: Arc<Self>,
        range: ByteRange,
        cancel: CancellationToken,
    ) -> ReceiverStream<ProxyResult<Bytes>> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for chunk in range.chunks(BUFFER_SIZE) {
                if tx.is_closed() {
                    debug!(range = %range, "range reader went away");
                    break;
                }
                match self.read_chunk(chunk, &cancel).await {
                    Ok(data) => {
                        if tx.send(Ok(data)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        if !matches!(err, ProxyError::Canceled) {
                            warn!(range = %chunk, error = %err, "range read failed");
                        }
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Closes the data connection once no exchange is in flight.
    pub async fn close(&self) {
        let mut channel = self.channel.lock().await;
        channel.broken = true;
        channel.source.close().await;
    }
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
