//! Synchronous request/response over the host's raw scripting pipe.
//!
//! One command is outstanding at a time. The client owns both directions of
//! the channel for its whole lifetime and releases them exactly once.

use crate::error::{Error, Result};
use crate::pipe::protocol::{Command, Response, ResponseBuffer, Terminator, LINE_TERMINATOR};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// How long to wait for the rest of a sentinel line once the sentinel is in
const SENTINEL_LINE_GRACE: Duration = Duration::from_millis(100);

/// Client for the processing host's command channel.
pub struct PipeClient<R, W> {
    /// `None` once closed
    io: Option<(BufReader<R>, W)>,
    terminator: Terminator,
    response_timeout: Option<Duration>,
    /// Last command sent, for timeout diagnostics
    last_command: Option<String>,
}

impl<R, W> PipeClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already-open channel.
    ///
    /// `reader` carries host responses, `writer` carries commands. On
    /// single-handle transports both may refer to the same endpoint.
    pub fn new(reader: R, writer: W, terminator: Terminator) -> Self {
        Self {
            io: Some((BufReader::new(reader), writer)),
            terminator,
            response_timeout: None,
            last_command: None,
        }
    }

    /// Bound how long [`receive`](Self::receive) waits for a complete response.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Write one command line and flush it.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let line = command.to_string();
        if !command.is_well_formed() {
            return Err(Error::MalformedCommand(line));
        }
        let (_, writer) = self.io.as_mut().ok_or(Error::ChannelClosed)?;

        debug!(command = %line, "Sending command");
        let mut payload = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        payload.extend_from_slice(line.as_bytes());
        payload.extend_from_slice(LINE_TERMINATOR.as_bytes());

        writer.write_all(&payload).await.map_err(channel_io_error)?;
        writer.flush().await.map_err(channel_io_error)?;

        self.last_command = Some(line);
        Ok(())
    }

    /// Block until one complete response has been read.
    ///
    /// If a response timeout is configured and expires, the channel is closed:
    /// a partially read response leaves the stream out of step with the host,
    /// so later reads could not be trusted.
    pub async fn receive(&mut self) -> Result<Response> {
        let Some(timeout) = self.response_timeout else {
            return self.read_response().await;
        };

        match tokio::time::timeout(timeout, self.read_response()).await {
            Ok(result) => result,
            Err(_) => {
                let command = self.last_command.clone().unwrap_or_default();
                warn!(
                    command = %command,
                    timeout = ?timeout,
                    "Processing host did not answer, closing channel"
                );
                self.close().await;
                Err(Error::ChannelTimeout { command, timeout })
            }
        }
    }

    /// Send a command and wait for its response.
    ///
    /// Fails with [`Error::CommandFailed`] if the host reports failure; the
    /// error carries both the command and the full response text.
    pub async fn execute(&mut self, command: &Command) -> Result<Response> {
        self.send(command).await?;
        let response = self.receive().await?;

        if response.is_failure() {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                response: response.into_text(),
            });
        }

        debug!(
            command = command.name(),
            bytes = response.len(),
            "Command finished"
        );
        Ok(response)
    }

    /// Release the channel. Closing an already-closed client is a no-op.
    pub async fn close(&mut self) {
        if let Some((_reader, mut writer)) = self.io.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Ignoring error while closing command channel");
            }
            debug!("Processing host channel closed");
        }
    }

    async fn read_response(&mut self) -> Result<Response> {
        let terminator = self.terminator;
        let (reader, _) = self.io.as_mut().ok_or(Error::ChannelClosed)?;

        match terminator {
            Terminator::BlankLine => read_lines(reader).await,
            Terminator::Sentinel => read_until_sentinel(reader).await,
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Response> {
    let mut buffer = ResponseBuffer::new(Terminator::BlankLine);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .await
            .map_err(channel_io_error)?;

        if n == 0 {
            // Host closed its end. Whatever arrived so far is the response.
            if buffer.is_empty() {
                return Err(Error::ChannelClosed);
            }
            break;
        }

        if buffer.push_line(&String::from_utf8_lossy(&raw)) {
            break;
        }
    }

    Ok(buffer.finish())
}

/// Sentinel channels are scanned on every read, not per line: the host may
/// leave the sentinel line unterminated.
async fn read_until_sentinel<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Response> {
    let mut buffer = ResponseBuffer::new(Terminator::Sentinel);

    loop {
        let available = if buffer.has_sentinel() {
            match tokio::time::timeout(SENTINEL_LINE_GRACE, reader.fill_buf()).await {
                Ok(read) => read.map_err(channel_io_error)?,
                Err(_) => {
                    debug!("Sentinel line left unterminated, accepting response");
                    break;
                }
            }
        } else {
            reader.fill_buf().await.map_err(channel_io_error)?
        };

        if available.is_empty() {
            if buffer.is_empty() {
                return Err(Error::ChannelClosed);
            }
            break;
        }

        let used = buffer.push_bytes(available);
        reader.consume(used);
        if buffer.is_complete() {
            break;
        }
    }

    Ok(buffer.finish())
}

/// A vanished peer is a closed channel, not a generic I/O failure.
fn channel_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            Error::ChannelClosed
        }
        _ => Error::Io(e),
    }
}

// =============================================================================
// Tests
// =============================================================================
