//! Content-Length message framing
//!
//! Every LSP message on a byte stream is a header block terminated by an empty
//! line, followed by exactly `Content-Length` bytes of payload:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}
//! ```
//!
//! The payload is never inspected or transformed here.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Name of the only header the framer requires
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Upper bound on a single payload, to reject garbage lengths early
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors raised while reading a frame
#[derive(Debug, Error)]
pub enum FramingError {
    /// A header line did not have the `Name: value` shape
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The header block ended without a Content-Length header
    #[error("Missing Content-Length header")]
    MissingContentLength,

    /// The Content-Length value was not a non-negative integer
    #[error("Invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    /// The declared length exceeds the accepted maximum
    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// The stream ended before the frame was complete
    #[error("Stream closed mid-frame")]
    StreamClosed,

    /// The underlying stream failed
    #[error("IO error while reading frame: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Whether the stream can keep being read after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FramingError::MalformedHeader(_)
                | FramingError::MissingContentLength
                | FramingError::InvalidContentLength(_)
        )
    }
}

/// Frame a payload for the wire
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, payload.len());
    let mut framed = Vec::with_capacity(header.len() + payload.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Parse the header block, returning the declared content length
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<usize, FramingError> {
    let mut content_length = None;
    let mut malformed = None;

    for line in lines {
        match line.split_once(':') {
            Some((name, value)) => {
                if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                    let value = value.trim();
                    let length = value
                        .parse::<usize>()
                        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
                    content_length = Some(length);
                }
            }
            None => {
                // Keep scanning so the whole header block is consumed before failing.
                if malformed.is_none() {
                    malformed = Some(line.to_string());
                }
            }
        }
    }

    if let Some(line) = malformed {
        return Err(FramingError::MalformedHeader(line));
    }

    let length = content_length.ok_or(FramingError::MissingContentLength)?;
    if length > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Try to decode one frame from the front of an in-memory buffer.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the payload and the
/// number of bytes consumed from `buffer`.
pub fn decode(buffer: &[u8]) -> Result<Option<(Vec<u8>, usize)>, FramingError> {
    let Some(header_end) = find_header_end(buffer) else {
        return Ok(None);
    };

    let header = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| FramingError::MalformedHeader("<non-utf8 header>".to_string()))?;
    let length = parse_headers(header.split("\r\n").filter(|line| !line.is_empty()))?;

    let body_start = header_end + 4;
    let body_end = body_start + length;
    if buffer.len() < body_end {
        return Ok(None);
    }

    Ok(Some((buffer[body_start..body_end].to_vec(), body_end)))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Read one frame from an async stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut header_lines = Vec::new();
    let mut saw_any = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if saw_any {
                return Err(FramingError::StreamClosed);
            }
            return Ok(None);
        }
        saw_any = true;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if header_lines.is_empty() {
                // Stray blank line between frames
                continue;
            }
            break;
        }
        header_lines.push(line.to_string());
    }

    let length = parse_headers(header_lines.iter().map(String::as_str))?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::StreamClosed
        } else {
            FramingError::Io(e)
        }
    })?;

    Ok(Some(payload))
}
