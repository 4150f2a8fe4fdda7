use std::{io, path::Path, pin::Pin};

use async_stream::stream;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::{error::DownloadError, scratch::ScratchDir};

const CHUNK_SIZE: usize = 64 * 1024;

/// An opened download, ready to be turned into a response body.
pub struct FileTransfer {
    pub len: u64,
    stream: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
}

impl FileTransfer {
    /// Opens `path` and ties the lifetime of `scratch` to the returned stream.
    /// If opening fails the scratch directory is released before returning.
    pub async fn open(path: &Path, scratch: ScratchDir) -> Result<Self, DownloadError> {
        let file = tokio::fs::File::open(path).await.map_err(|error| {
            DownloadError::filesystem("could not open the downloaded file", path, error)
        })?;
        let len = file
            .metadata()
            .await
            .map_err(|error| {
                DownloadError::filesystem("could not read the downloaded file", path, error)
            })?
            .len();

        Ok(Self {
            len,
            stream: Box::pin(stream_and_release(file, len, scratch)),
        })
    }

    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        self.stream
    }
}

struct TransferGuard {
    scratch: Option<ScratchDir>,
    sent: u64,
    expected: u64,
}

impl TransferGuard {
    async fn finish(&mut self, complete: bool) {
        let Some(scratch) = self.scratch.take() else {
            return;
        };

        if complete {
            debug!(bytes = self.sent, "transfer complete");
        } else {
            warn!(
                bytes = self.sent,
                expected = self.expected,
                "transfer failed while reading"
            );
        }
        scratch.release_offloaded().await;
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let interrupted = DownloadError::StreamInterrupted {
                sent: self.sent,
                expected: self.expected,
            };
            info!("{interrupted}");
            scratch.release();
        }
    }
}

/// One-shot body stream. The scratch directory goes away when the file is
/// exhausted, when a read fails, or when the stream is dropped early.
fn stream_and_release(
    file: tokio::fs::File,
    expected: u64,
    scratch: ScratchDir,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream! {
        let mut guard = TransferGuard {
            scratch: Some(scratch),
            sent: 0,
            expected,
        };
        let mut chunks = ReaderStream::with_capacity(file, CHUNK_SIZE);
        let mut failure = None;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    guard.sent += bytes.len() as u64;
                    yield Ok(bytes);
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        // Close the file before its directory disappears.
        drop(chunks);
        guard.finish(failure.is_none()).await;

        if let Some(error) = failure {
            yield Err(error);
        }
    }
}
