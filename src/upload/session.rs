//! Upload session state and the values passed to the remote store.

use serde::Serialize;
use std::sync::Arc;

/// Largest body the store accepts in one request (4MB)
pub const CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Absolute per-object ceiling (150MB)
pub const MAX_OBJECT_SIZE: u64 = 157_286_400;

// =============================================================================
// Wire values
// =============================================================================

/// Position within an open upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadCursor {
    pub session_id: String,
    pub offset: u64,
}

/// Conflict behaviour when committing a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Never overwrite an existing file
    Add,
    /// Replace whatever is at the path
    Overwrite,
}

/// Destination metadata sent with a single-shot upload or a session finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
    pub autorename: bool,
    pub mute: bool,
}

impl CommitInfo {
    pub fn new(path: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
            autorename: false,
            mute: false,
        }
    }

    /// Commit to `path`, failing if something is already there.
    pub fn add(path: impl Into<String>) -> Self {
        Self::new(path, WriteMode::Add)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Local view of one server-side upload session.
///
/// `offset` only moves through [`UploadSession::acknowledge`], which the
/// uploader calls after the store has confirmed a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    session_id: String,
    remote_path: Arc<str>,
    offset: u64,
}

impl UploadSession {
    /// Session opened by a start call that carried `first_chunk_len` bytes.
    pub fn started(session_id: String, remote_path: Arc<str>, first_chunk_len: u64) -> Self {
        Self {
            session_id,
            remote_path,
            offset: first_chunk_len,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cursor(&self) -> UploadCursor {
        UploadCursor {
            session_id: self.session_id.clone(),
            offset: self.offset,
        }
    }

    /// Record `len` more bytes as accepted by the store.
    pub fn acknowledge(&mut self, len: u64) {
        self.offset += len;
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Which protocol path an object of a given size takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// One request carrying the whole object
    Single,
    /// start + `appends` x append + finish
    Session { appends: u64, last_chunk: u64 },
}

impl UploadPlan {
    pub fn for_size(size: u64, chunk_size: u64) -> Self {
        if size <= chunk_size {
            return UploadPlan::Single;
        }
        let chunks = size.div_ceil(chunk_size);
        let last_chunk = size - (chunks - 1) * chunk_size;
        UploadPlan::Session {
            appends: chunks - 2,
            last_chunk,
        }
    }

    /// Total number of network calls.
    pub fn calls(&self) -> u64 {
        match self {
            UploadPlan::Single => 1,
            UploadPlan::Session { appends, .. } => appends + 2,
        }
    }
}

/// Which step of the upload a progress report follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Committed,
    SessionStarted,
    Appended,
    Finished,
}

/// Progress after each confirmed chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub remote_path: Arc<str>,
    pub phase: UploadPhase,
    pub chunks_sent: u64,
    /// `size / chunk_size`, fractional
    pub total_chunks: f64,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// `round(chunks_sent / total_chunks * 100)`, capped at 100.
    ///
    /// The chunk carried by the session start counts as sent, so the first
    /// report of a session is already above zero.
    pub fn percent(&self) -> u64 {
        if self.total_chunks <= 0.0 {
            return 100;
        }
        let pct = (self.chunks_sent as f64 / self.total_chunks * 100.0).round();
        (pct as u64).min(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: u64 = 1024;

    #[test]
    fn test_plan_boundaries() {
        assert_eq!(UploadPlan::for_size(0, C), UploadPlan::Single);
        assert_eq!(UploadPlan::for_size(C, C), UploadPlan::Single);
        assert_eq!(
            UploadPlan::for_size(C + 1, C),
            UploadPlan::Session {
                appends: 0,
                last_chunk: 1
            }
        );
        assert_eq!(
            UploadPlan::for_size(3 * C, C),
            UploadPlan::Session {
                appends: 1,
                last_chunk: C
            }
        );
        assert_eq!(UploadPlan::for_size(5 * C + 7, C).calls(), 6);
    }

    #[test]
    fn test_session_offset_only_moves_on_ack() {
        let mut session = UploadSession::started("sid".to_string(), Arc::from("/out/a.mp3"), C);
        assert_eq!(session.offset(), C);
        assert_eq!(
            session.cursor(),
            UploadCursor {
                session_id: "sid".to_string(),
                offset: C
            }
        );
        session.acknowledge(C);
        assert_eq!(session.offset(), 2 * C);
        assert_eq!(session.remote_path(), "/out/a.mp3");
    }

    #[test]
    fn test_commit_info_json() {
        let json = serde_json::to_value(CommitInfo::add("/out/a.mp3")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "/out/a.mp3",
                "mode": "add",
                "autorename": false,
                "mute": false
            })
        );
    }

    #[test]
    fn test_overwrite_mode_json() {
        let json = serde_json::to_value(CommitInfo::new("/out/a.mp3", WriteMode::Overwrite)).unwrap();
        assert_eq!(json["mode"], "overwrite");
    }

    #[test]
    fn test_percent_counts_start_chunk() {
        let progress = UploadProgress {
            remote_path: Arc::from("/out/a.mp3"),
            phase: UploadPhase::SessionStarted,
            chunks_sent: 1,
            total_chunks: 4.0,
            bytes_sent: C,
            total_bytes: 4 * C,
        };
        assert_eq!(progress.percent(), 25);
    }

    #[test]
    fn test_percent() {
        let mut progress = UploadProgress {
            remote_path: Arc::from("/out/a.mp3"),
            phase: UploadPhase::Appended,
            chunks_sent: 1,
            total_chunks: 2.5,
            bytes_sent: C,
            total_bytes: 5 * C / 2,
        };
        assert_eq!(progress.percent(), 40);
        progress.chunks_sent = 3;
        assert_eq!(progress.percent(), 100);
    }
}
