//! STOMP 1.2 frame encoding and decoding.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...
//! \n
//! body\0
//! ```
//!
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) on every
//! frame except CONNECT and CONNECTED.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::net::transport::TransportError;

/// Largest frame body accepted from the broker.
pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;

/// Largest command or header line accepted from the broker.
const MAX_LINE: usize = 64 * 1024;

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`; repeated headers keep the earliest entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn escapes_headers(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }

    /// Serialize the frame, adding `content-length` when asked to and the
    /// frame carries a body.
    pub fn encode(&self, content_length: bool) -> Vec<u8> {
        let escape_headers = self.escapes_headers();
        let mut out = Vec::with_capacity(self.command.len() + self.body.len() + 64);
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');

        for (key, value) in &self.headers {
            if escape_headers {
                out.extend_from_slice(escape(key).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape(value).as_bytes());
            } else {
                out.extend_from_slice(key.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if content_length && !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String, TransportError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(TransportError::Protocol(format!(
                    "invalid header escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn eof_aware(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ClosedUnexpectedly("connection closed mid-frame".into())
    } else {
        TransportError::Io(e)
    }
}

/// Read one line without its `\n` / `\r\n` terminator. `None` on clean EOF.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE && buf.last() != Some(&b'\n') {
        return Err(TransportError::Protocol(format!(
            "frame line exceeds {} bytes",
            MAX_LINE
        )));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| TransportError::Protocol("frame header is not UTF-8".into()))
}

/// Read the next frame, skipping heart-beat newlines.
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    read_frame_limited(reader, MAX_FRAME_BODY).await
}

/// [`read_frame`] with a custom body limit. Larger bodies are a protocol
/// error, whether announced by `content-length` or not.
pub async fn read_frame_limited<R>(reader: &mut R, max_body: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let command = loop {
        match read_line(reader).await? {
            None => return Ok(None),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut frame = Frame::new(command);
    let escaped = frame.escapes_headers();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| TransportError::ClosedUnexpectedly("connection closed mid-frame".into()))?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Protocol(format!("malformed header `{}`", line)))?;
        if escaped {
            frame.headers.push((unescape(key)?, unescape(value)?));
        } else {
            frame.headers.push((key.to_string(), value.to_string()));
        }
    }

    match frame.get("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| TransportError::Protocol(format!("invalid content-length `{}`", len)))?;
            if len > max_body {
                return Err(TransportError::Protocol(format!(
                    "content-length {} exceeds {} bytes",
                    len, max_body
                )));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await.map_err(eof_aware)?;
            let terminator = reader.read_u8().await.map_err(eof_aware)?;
            if terminator != 0 {
                return Err(TransportError::Protocol("frame body not NUL-terminated".into()));
            }
            frame.body = body;
        }
        None => {
            let mut body = Vec::new();
            (&mut *reader)
                .take(max_body as u64 + 1)
                .read_until(0, &mut body)
                .await?;
            if body.last() == Some(&0) {
                body.pop();
            } else if body.len() > max_body {
                return Err(TransportError::Protocol(format!(
                    "frame body exceeds {} bytes",
                    max_body
                )));
            } else {
                return Err(TransportError::ClosedUnexpectedly(
                    "connection closed mid-frame".into(),
                ));
            }
            frame.body = body;
        }
    }

    Ok(Some(frame))
}
