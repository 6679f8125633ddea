//! Wire format for the processing host's scripting pipe.
//!
//! The host speaks a line-oriented macro language with no typed framing:
//! one command per line in, free text out, terminated either by a blank line
//! or by an explicit `BatchCommand finished` sentinel depending on the
//! transport.

use std::fmt;

/// Line terminator appended to every outbound command
pub const LINE_TERMINATOR: &str = "\n";

/// Substring marking the end of a response on sentinel-framed channels
pub const FINISHED_SENTINEL: &str = "BatchCommand finished";

/// Substring marking a failed command anywhere in a response
pub const FAILED_SENTINEL: &str = "BatchCommand finished: Failed!";

// =============================================================================
// Command
// =============================================================================

/// A scalar parameter value, rendered in its natural text form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    /// Rendered as `True` / `False`
    Bool(bool),
    /// Free text (file names and the like)
    Text(String),
    /// Enumerated token such as `SoftLimit` or `No`
    Token(&'static str),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Text(v) => f.write_str(v),
            Value::Token(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Value::Token(v)
    }
}

/// One batch command: `Name: key1=value1 key2=value2`.
///
/// Values are not quoted or escaped. A value containing a line break would
/// split the command on the wire; the client refuses to send such a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    params: Vec<(String, Value)>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the rendered line contains no embedded line breaks.
    pub fn is_well_formed(&self) -> bool {
        !self.to_string().contains(['\n', '\r'])
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for (key, value) in &self.params {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Response
// =============================================================================

/// Accumulated text returned by the host for a single command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response(String);

impl Response {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }

    pub fn is_failure(&self) -> bool {
        self.0.contains(FAILED_SENTINEL)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Response termination
// =============================================================================

/// How the end of a response is recognised on a given channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// A bare line terminator after at least one line of content.
    /// Used by the FIFO pair on Unix, where the host flushes a blank line.
    BlankLine,
    /// A line containing [`FINISHED_SENTINEL`] has been read.
    /// Used by message-mode named pipes, which carry no blank-line framing.
    Sentinel,
}

impl Terminator {
    fn is_blank(line: &str) -> bool {
        line == "\n" || line == "\r\n"
    }
}

/// Accumulator for one response.
///
/// Blank lines that arrive before any content are dropped, so a trailing
/// separator left over from the previous response never leaks into the next.
#[derive(Debug)]
pub struct ResponseBuffer {
    terminator: Terminator,
    bytes: Vec<u8>,
    /// Offset just past the finished sentinel, once seen
    sentinel_end: Option<usize>,
    complete: bool,
}

impl ResponseBuffer {
    pub fn new(terminator: Terminator) -> Self {
        Self {
            terminator,
            bytes: Vec::new(),
            sentinel_end: None,
            complete: false,
        }
    }

    /// Feed one line (including its terminator, if any).
    /// Returns true once the response is complete.
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.complete {
            return true;
        }
        let blank = Terminator::is_blank(line);
        if blank && self.bytes.is_empty() {
            return false;
        }
        match self.terminator {
            Terminator::BlankLine => {
                if blank {
                    self.complete = true;
                } else {
                    self.bytes.extend_from_slice(line.as_bytes());
                }
            }
            Terminator::Sentinel => {
                self.bytes.extend_from_slice(line.as_bytes());
                if line.contains(FINISHED_SENTINEL) {
                    self.complete = true;
                }
            }
        }
        self.complete
    }

    /// Feed raw bytes from a sentinel-framed channel, wherever the read
    /// happened to stop.
    ///
    /// Returns how many of `bytes` belong to this response. The response ends
    /// with the line break that closes the sentinel line; anything after it
    /// is left unconsumed for the next response.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        if self.complete {
            return 0;
        }
        let skipped = if self.bytes.is_empty() {
            bytes
                .iter()
                .take_while(|&&b| b == b'\n' || b == b'\r')
                .count()
        } else {
            0
        };
        let start = self.bytes.len();
        self.bytes.extend_from_slice(&bytes[skipped..]);

        if self.sentinel_end.is_none() {
            // the sentinel may straddle the previous read
            let from = start.saturating_sub(FINISHED_SENTINEL.len() - 1);
            self.sentinel_end = find(&self.bytes[from..], FINISHED_SENTINEL.as_bytes())
                .map(|at| from + at + FINISHED_SENTINEL.len());
        }
        let Some(sentinel_end) = self.sentinel_end else {
            return bytes.len();
        };

        match self.bytes[sentinel_end..].iter().position(|&b| b == b'\n') {
            Some(at) => {
                let line_end = sentinel_end + at + 1;
                let surplus = self.bytes.len() - line_end;
                self.bytes.truncate(line_end);
                self.complete = true;
                bytes.len() - surplus
            }
            None => bytes.len(),
        }
    }

    /// True once the finished sentinel has arrived, even if the rest of its
    /// line has not.
    pub fn has_sentinel(&self) -> bool {
        self.sentinel_end.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Response {
        Response(String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        let cmd = Command::new("Compressor")
            .param("Threshold", -12i64)
            .param("Normalize", true)
            .param("UsePeak", false);
        assert_eq!(
            cmd.to_string(),
            "Compressor: Threshold=-12 Normalize=True UsePeak=False"
        );
    }

    #[test]
    fn test_command_without_params() {
        assert_eq!(Command::new("SelectAll").to_string(), "SelectAll:");
    }

    #[test]
    fn test_float_and_token_values() {
        let cmd = Command::new("Limiter")
            .param("type", "SoftLimit")
            .param("hold", 6.2)
            .param("thresh", -4i64);
        assert_eq!(cmd.to_string(), "Limiter: type=SoftLimit hold=6.2 thresh=-4");
    }

    #[test]
    fn test_embedded_newline_is_not_well_formed() {
        let ok = Command::new("Import2").param("Filename", "/tmp/a.mp3".to_string());
        assert!(ok.is_well_formed());
        let bad = Command::new("Import2").param("Filename", "/tmp/a\n.mp3".to_string());
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_blank_line_terminator() {
        let mut buf = ResponseBuffer::new(Terminator::BlankLine);
        assert!(!buf.push_line("Importing\n"));
        assert!(!buf.push_line("BatchCommand finished: OK\n"));
        assert!(buf.push_line("\n"));
        assert_eq!(buf.finish().text(), "Importing\nBatchCommand finished: OK\n");
    }

    #[test]
    fn test_leading_blank_lines_are_skipped() {
        let mut buf = ResponseBuffer::new(Terminator::BlankLine);
        assert!(!buf.push_line("\n"));
        assert!(!buf.push_line("\r\n"));
        assert!(buf.is_empty());
        assert!(!buf.push_line("BatchCommand finished: OK\n"));
        assert!(buf.push_line("\n"));
    }

    #[test]
    fn test_sentinel_terminator() {
        let mut buf = ResponseBuffer::new(Terminator::Sentinel);
        assert!(!buf.push_line("line one\n"));
        // blank lines inside a response are content on sentinel channels
        assert!(!buf.push_line("\n"));
        assert!(buf.push_line("BatchCommand finished: OK\n"));
        assert_eq!(
            buf.finish().text(),
            "line one\n\nBatchCommand finished: OK\n"
        );
    }

    #[test]
    fn test_sentinel_split_across_reads() {
        let mut buf = ResponseBuffer::new(Terminator::Sentinel);
        assert_eq!(buf.push_bytes(b"\nImported\nBatchCommand fin"), 26);
        assert!(!buf.has_sentinel());
        assert_eq!(buf.push_bytes(b"ished: OK"), 9);
        assert!(buf.has_sentinel());
        assert!(!buf.is_complete());
        assert_eq!(buf.push_bytes(b"\nnext\n"), 1);
        assert!(buf.is_complete());
        assert_eq!(buf.push_bytes(b"next\n"), 0);
        assert_eq!(
            buf.finish().text(),
            "Imported\nBatchCommand finished: OK\n"
        );
    }

    #[test]
    fn test_sentinel_without_line_break() {
        let mut buf = ResponseBuffer::new(Terminator::Sentinel);
        assert_eq!(buf.push_bytes(b"Imported\nBatchCommand finished: OK"), 34);
        assert!(buf.has_sentinel());
        assert!(!buf.is_complete());
        assert_eq!(buf.finish().text(), "Imported\nBatchCommand finished: OK");
    }

    #[test]
    fn test_failure_detection() {
        let ok = Response::new("BatchCommand finished: OK\n");
        assert!(!ok.is_failure());
        let failed = Response::new("Nothing selected\nBatchCommand finished: Failed!\n");
        assert!(failed.is_failure());
    }
}
