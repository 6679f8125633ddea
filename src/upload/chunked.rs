//! Chunked uploader.
//!
//! Objects up to `chunk_size` go up in one request. Larger objects use a
//! session: start (first chunk), append* (middle chunks), finish (last
//! chunk + commit). The local read cursor and the session offset move in
//! lockstep; the offset advances only after the store confirms a chunk.
//!
//! ```text
//! Idle --(size <= chunk)--> Committing --> Done
//! Idle --> SessionStarted --> [Appending]* --> Finishing --> Done
//!   any step --> Failed (terminal, a retry starts a new session)
//! ```

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::upload::session::{
    CommitInfo, UploadPhase, UploadPlan, UploadProgress, UploadSession, WriteMode, CHUNK_SIZE,
    MAX_OBJECT_SIZE,
};
use crate::upload::transport::UploadTransport;
use bytes::Bytes;
use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

/// Uploads local byte streams through an [`UploadTransport`].
pub struct ChunkedUploader<T> {
    transport: T,
    chunk_size: u64,
    max_object_size: u64,
    chunk_timeout: Option<Duration>,
    write_mode: WriteMode,
}

impl<T: UploadTransport> ChunkedUploader<T> {
    /// Uploader with the store's default limits and no call deadline.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            chunk_size: CHUNK_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
            chunk_timeout: None,
            write_mode: WriteMode::Add,
        }
    }

    pub fn from_config(transport: T, config: &UploadConfig) -> Self {
        Self {
            transport,
            chunk_size: config.chunk_size,
            max_object_size: config.max_object_size,
            chunk_timeout: config.chunk_timeout(),
            write_mode: WriteMode::Add,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_object_size(mut self, max_object_size: u64) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Conflict behaviour for every commit this uploader makes.
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload a local file to `remote_path`.
    pub async fn upload_file<F>(
        &self,
        local_path: &Path,
        remote_path: &str,
        on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(&UploadProgress),
    {
        let file = File::open(local_path).await?;
        let size = file.metadata().await?.len();
        self.upload(file, size, remote_path, on_progress).await
    }

    /// Upload exactly `size` bytes from `reader` to `remote_path`.
    ///
    /// Rejects objects over the size ceiling before any request is made,
    /// whichever path they would take. A failed chunk abandons the session.
    pub async fn upload<R, F>(
        &self,
        mut reader: R,
        size: u64,
        remote_path: &str,
        mut on_progress: F,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        F: FnMut(&UploadProgress),
    {
        if size > self.max_object_size {
            return Err(Error::SizeLimitExceeded {
                remote_path: remote_path.to_string(),
                size,
                limit: self.max_object_size,
            });
        }

        let remote_path: Arc<str> = Arc::from(remote_path);
        let commit = CommitInfo::new(&*remote_path, self.write_mode);

        let plan = UploadPlan::for_size(size, self.chunk_size);
        if plan == UploadPlan::Single {
            let data = read_chunk(&mut reader, size).await?;
            self.call(&remote_path, 0, self.transport.upload(&commit, data))
                .await?;
            info!(remote_path = %remote_path, bytes = size, "Uploaded");
            on_progress(&UploadProgress {
                remote_path: remote_path.clone(),
                phase: UploadPhase::Committed,
                chunks_sent: 1,
                total_chunks: 1.0,
                bytes_sent: size,
                total_bytes: size,
            });
            return Ok(());
        }

        let total_chunks = size as f64 / self.chunk_size as f64;
        let mut chunks_sent = 0u64;
        let mut report = |phase: UploadPhase, chunks_sent: u64, bytes_sent: u64| {
            let progress = UploadProgress {
                remote_path: remote_path.clone(),
                phase,
                chunks_sent,
                total_chunks,
                bytes_sent,
                total_bytes: size,
            };
            info!("{} - {}%", progress.remote_path, progress.percent());
            on_progress(&progress);
        };

        // Start
        let first = read_chunk(&mut reader, self.chunk_size).await?;
        let session_id = self
            .call(&remote_path, 0, self.transport.start_session(first))
            .await?;
        let mut session = UploadSession::started(session_id, remote_path.clone(), self.chunk_size);
        debug!(
            remote_path = %remote_path,
            session_id = session.session_id(),
            calls = plan.calls(),
            "Upload session started"
        );
        chunks_sent += 1;
        report(UploadPhase::SessionStarted, chunks_sent, session.offset());

        // Append* then finish
        while session.offset() < size {
            let remaining = size - session.offset();
            let len = remaining.min(self.chunk_size);
            let data = read_chunk(&mut reader, len).await?;
            let cursor = session.cursor();

            let phase = if remaining <= self.chunk_size {
                self.call(
                    &remote_path,
                    cursor.offset,
                    self.transport.finish(&cursor, &commit, data),
                )
                .await?;
                UploadPhase::Finished
            } else {
                self.call(
                    &remote_path,
                    cursor.offset,
                    self.transport.append(&cursor, data),
                )
                .await?;
                UploadPhase::Appended
            };

            session.acknowledge(len);
            chunks_sent += 1;
            report(phase, chunks_sent, session.offset());
        }

        info!(
            remote_path = %remote_path,
            bytes = size,
            chunks = chunks_sent,
            "Uploaded"
        );
        Ok(())
    }

    /// Run one store call under the configured deadline, tagging failures
    /// with the path and offset they happened at.
    async fn call<O>(
        &self,
        remote_path: &str,
        offset: u64,
        request: impl Future<Output = Result<O>>,
    ) -> Result<O> {
        let result = match self.chunk_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, request).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::UploadTimeout {
                        remote_path: remote_path.to_string(),
                        offset,
                        timeout,
                    })
                }
            },
            None => request.await,
        };
        result.map_err(|e| match e {
            e @ (Error::UploadFailed { .. } | Error::UploadTimeout { .. }) => e,
            other => Error::upload_failed(remote_path, offset, other),
        })
    }
}

/// Read exactly `len` bytes, failing if the source ends early.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(len as usize);
    (&mut *reader).take(len).read_to_end(&mut buf).await?;
    if (buf.len() as u64) < len {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("source ended after {} of {} bytes", buf.len(), len),
        )));
    }
    Ok(Bytes::from(buf))
}

// =============================================================================
// Tests
// =============================================================================
