//! The calls the pipeline makes against the remote store: the four upload
//! calls of an append-only, offset-verified store, plus copy, listing and
//! download.

use crate::error::Result;
use crate::upload::session::{CommitInfo, UploadCursor};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Store a small object in one request.
    async fn upload(&self, commit: &CommitInfo, data: Bytes) -> Result<()>;

    /// Open a session with its first chunk. Returns the session id.
    async fn start_session(&self, data: Bytes) -> Result<String>;

    /// Append a chunk at `cursor.offset`. The session stays open.
    async fn append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()>;

    /// Send the final chunk at `cursor.offset` and commit the object.
    async fn finish(&self, cursor: &UploadCursor, commit: &CommitInfo, data: Bytes) -> Result<()>;
}

#[async_trait]
impl<T: UploadTransport + ?Sized> UploadTransport for Arc<T> {
    async fn upload(&self, commit: &CommitInfo, data: Bytes) -> Result<()> {
        (**self).upload(commit, data).await
    }

    async fn start_session(&self, data: Bytes) -> Result<String> {
        (**self).start_session(data).await
    }

    async fn append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()> {
        (**self).append(cursor, data).await
    }

    async fn finish(&self, cursor: &UploadCursor, commit: &CommitInfo, data: Bytes) -> Result<()> {
        (**self).finish(cursor, commit, data).await
    }
}

/// Server-side copy, used to archive an uploaded object.
#[async_trait]
pub trait RemoteCopy: Send + Sync {
    async fn copy(&self, from_path: &str, to_path: &str) -> Result<()>;
}

#[async_trait]
impl<T: RemoteCopy + ?Sized> RemoteCopy for Arc<T> {
    async fn copy(&self, from_path: &str, to_path: &str) -> Result<()> {
        (**self).copy(from_path, to_path).await
    }
}

/// A file in a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Base name
    pub name: String,
    /// Full path to pass back to [`RemoteSource::download`]
    pub path: String,
    pub size: u64,
}

/// Read side of the store, used to fetch pending recordings.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Files (not folders) directly inside `folder`, across all result pages.
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>>;

    /// Stream `remote_path` into `local_path`, replacing it. Returns the
    /// number of bytes written.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64>;
}

#[async_trait]
impl<T: RemoteSource + ?Sized> RemoteSource for Arc<T> {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        (**self).list_files(folder).await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        (**self).download(remote_path, local_path).await
    }
}

/// Everything a pipeline run needs from the store.
pub trait RemoteStore: UploadTransport + RemoteCopy + RemoteSource {}

impl<T: UploadTransport + RemoteCopy + RemoteSource + ?Sized> RemoteStore for T {}
