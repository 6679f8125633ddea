//! Channel endpoints - opens the host's scripting pipe for this process.
//!
//! Unix: two FIFOs in the temp directory keyed by uid, blank-line framed.
//! Windows: two message-mode named pipes, sentinel framed.

use crate::config::PipeConfig;
use crate::error::{Error, Result};
use crate::pipe::client::PipeClient;
use crate::pipe::protocol::Terminator;
use std::path::{Path, PathBuf};

const ENABLE_HINT: &str =
    "start the processing host and enable \"mod-script-pipe\" in Preferences > Modules";

/// Locations of the two directional endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    /// Commands flow here
    pub to_host: PathBuf,
    /// Responses come from here
    pub from_host: PathBuf,
}

impl ChannelPaths {
    /// Endpoint names the host binds for the current user.
    #[cfg(unix)]
    pub fn for_current_user() -> Self {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        let tmp = std::env::temp_dir();
        Self {
            to_host: tmp.join(format!("audacity_script_pipe.to.{}", uid)),
            from_host: tmp.join(format!("audacity_script_pipe.from.{}", uid)),
        }
    }

    /// Endpoint names the host binds for the current user.
    #[cfg(windows)]
    pub fn for_current_user() -> Self {
        Self {
            to_host: PathBuf::from(r"\\.\pipe\ToSrvPipe"),
            from_host: PathBuf::from(r"\\.\pipe\FromSrvPipe"),
        }
    }

    /// Per-user defaults with any overrides from the `[pipe]` config table.
    pub fn from_config(config: &PipeConfig) -> Self {
        let defaults = Self::for_current_user();
        Self {
            to_host: config.to_host.clone().unwrap_or(defaults.to_host),
            from_host: config.from_host.clone().unwrap_or(defaults.from_host),
        }
    }
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::channel_unavailable(
        path.display().to_string(),
        format!("{}; {}", reason, ENABLE_HINT),
    )
}

// =============================================================================
// Unix
// =============================================================================

#[cfg(unix)]
pub type HostPipe = PipeClient<tokio::net::unix::pipe::Receiver, tokio::net::unix::pipe::Sender>;

/// Open the host's command channel.
///
/// Fails with [`Error::ChannelUnavailable`] when the FIFOs do not exist or
/// the host is not reading from them yet. Not retried.
#[cfg(unix)]
pub async fn connect(paths: &ChannelPaths) -> Result<HostPipe> {
    use tokio::net::unix::pipe;

    check_endpoint(&paths.to_host)?;

    let sender = pipe::OpenOptions::new()
        .open_sender(&paths.to_host)
        .map_err(|e| {
            if e.raw_os_error() == Some(libc::ENXIO) {
                unavailable(&paths.to_host, "pipe not ready (no reader)")
            } else {
                unavailable(&paths.to_host, e)
            }
        })?;

    let mut options = pipe::OpenOptions::new();
    // Holding a write reference keeps reads from seeing EOF before the
    // host has opened its end.
    #[cfg(target_os = "linux")]
    options.read_write(true);
    let receiver = options
        .open_receiver(&paths.from_host)
        .map_err(|e| unavailable(&paths.from_host, e))?;

    tracing::info!(
        to_host = %paths.to_host.display(),
        from_host = %paths.from_host.display(),
        "Connected to processing host"
    );
    Ok(PipeClient::new(receiver, sender, Terminator::BlankLine))
}

/// Check that `path` is a FIFO the host could be listening on, without
/// opening it.
#[cfg(unix)]
pub fn check_endpoint(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(unavailable(path, "not a FIFO")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(unavailable(path, "pipe not found"))
        }
        Err(e) => Err(unavailable(path, e)),
    }
}

// =============================================================================
// Windows
// =============================================================================

#[cfg(windows)]
pub type HostPipe = PipeClient<
    tokio::net::windows::named_pipe::NamedPipeClient,
    tokio::net::windows::named_pipe::NamedPipeClient,
>;

/// Open the host's command channel.
///
/// Fails with [`Error::ChannelUnavailable`] when either named pipe is
/// missing or busy. Not retried.
#[cfg(windows)]
pub async fn connect(paths: &ChannelPaths) -> Result<HostPipe> {
    use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};

    let writer = ClientOptions::new()
        .open(&paths.to_host)
        .map_err(|e| unavailable(&paths.to_host, e))?;
    // `writer` is dropped (closing its handle) if this fails
    let reader = ClientOptions::new()
        .pipe_mode(PipeMode::Message)
        .open(&paths.from_host)
        .map_err(|e| unavailable(&paths.from_host, e))?;

    tracing::info!(
        to_host = %paths.to_host.display(),
        from_host = %paths.from_host.display(),
        "Connected to processing host"
    );
    Ok(PipeClient::new(reader, writer, Terminator::Sentinel))
}

/// Check that the named pipe at `path` is being served by opening a client
/// handle and dropping it. A pipe whose instances are all busy counts as
/// present. Must run inside a Tokio runtime.
#[cfg(windows)]
pub fn check_endpoint(path: &Path) -> Result<()> {
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;

    match ClientOptions::new().open(path) {
        Ok(_client) => Ok(()),
        Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(unavailable(path, "pipe not found"))
        }
        Err(e) => Err(unavailable(path, e)),
    }
}
