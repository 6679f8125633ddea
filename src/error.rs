use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("processing host endpoint unavailable ({endpoint}): {reason}")]
    ChannelUnavailable { endpoint: String, reason: String },

    #[error("processing host channel is closed")]
    ChannelClosed,

    #[error("no response to `{command}` within {timeout:?}")]
    ChannelTimeout { command: String, timeout: Duration },

    #[error("command contains a line break and cannot be sent: {0:?}")]
    MalformedCommand(String),

    #[error("command failed: {command}\n{response}")]
    CommandFailed { command: String, response: String },

    #[error("{remote_path} is {size} bytes, above the {limit} byte object limit")]
    SizeLimitExceeded {
        remote_path: String,
        size: u64,
        limit: u64,
    },

    #[error("upload of {remote_path} failed at offset {offset}: {reason}")]
    UploadFailed {
        remote_path: String,
        offset: u64,
        reason: String,
    },

    #[error("upload of {remote_path} timed out at offset {offset} after {timeout:?}")]
    UploadTimeout {
        remote_path: String,
        offset: u64,
        timeout: Duration,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn channel_unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelUnavailable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn upload_failed(
        remote_path: impl Into<String>,
        offset: u64,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::UploadFailed {
            remote_path: remote_path.into(),
            offset,
            reason: reason.to_string(),
        }
    }

    /// Whether a batch run should stop at this error.
    ///
    /// A file that is too large is skipped; everything else (a host that said
    /// no, a broken channel, a dead upload session) stops the batch.
    pub fn aborts_batch(&self) -> bool {
        !matches!(self, Self::SizeLimitExceeded { .. })
    }
}
