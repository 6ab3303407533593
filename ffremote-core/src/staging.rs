//! Worker-side output files: where they live, how they are served and when
//! they go away.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::proxy::BUFFER_SIZE;
use crate::signal::Completion;

/// `{temp_dir}/{session}-{output}{ext}`
pub fn output_path(temp_dir: &Path, session: Uuid, output: Uuid, ext: &str) -> PathBuf {
    temp_dir.join(format!("{session}-{output}{ext}"))
}

#[derive(Debug)]
pub struct StagedOutput {
    id: Uuid,
    path: PathBuf,
    delivered: Completion<()>,
}

impl StagedOutput {
    pub fn new(id: Uuid, path: PathBuf) -> Self {
        Self {
            id,
            path,
            delivered: Completion::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Settles when a download finishes (completed) or is abandoned
    /// (canceled).
    pub fn delivered(&self) -> &Completion<()> {
        &self.delivered
    }

    /// Opens the staged file for download. A file the transcoder never
    /// created reports `NotFound`.
    pub async fn open(self: &Arc<Self>) -> io::Result<(u64, DeliveryStream)> {
        let file = File::open(&self.path).await?;
        let length = file.metadata().await?.len();
        Ok((
            length,
            DeliveryStream {
                inner: ReaderStream::with_capacity(file, BUFFER_SIZE as usize),
                output: Arc::clone(self),
                finished: false,
            },
        ))
    }

    /// Deletes the staged file. Failures are logged, never raised.
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(output = %self.id, path = %self.path.display(), "output deleted"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(output = %self.id, path = %self.path.display(), error = %err, "failed to delete output");
            }
        }
    }
}

/// File body that settles its output's `delivered` signal.
pub struct DeliveryStream {
    inner: ReaderStream<File>,
    output: Arc<StagedOutput>,
    finished: bool,
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(None) => {
                self.finished = true;
                self.output.delivered.complete(());
            }
            Poll::Ready(Some(Err(_))) => {
                self.finished = true;
                self.output.delivered.cancel();
            }
            _ => {}
        }
        polled
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if !self.finished {
            self.output.delivered.cancel();
        }
    }
}
