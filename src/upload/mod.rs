//! Chunked uploads to an append-only, offset-verified object store.
//!
//! ```text
//! ChunkedUploader --(UploadTransport)--> DropboxClient --> HTTPS
//! Pipeline --------(RemoteSource, RemoteCopy)----^
//! ```

pub mod chunked;
pub mod dropbox;
pub mod session;
pub mod transport;

pub use chunked::ChunkedUploader;
pub use dropbox::{authorize_url, exchange_auth_code, Account, DropboxClient};
pub use session::{
    CommitInfo, UploadCursor, UploadPhase, UploadPlan, UploadProgress, UploadSession, WriteMode,
    CHUNK_SIZE, MAX_OBJECT_SIZE,
};
pub use transport::{RemoteCopy, RemoteFile, RemoteSource, RemoteStore, UploadTransport};
