//! Length-prefixed framing for the server transport.
//!
//! Each frame is a `Content-Length: <N>` header line, a blank separator
//! line, and exactly `N` bytes of UTF-8 JSON. The body boundary is defined
//! solely by the declared length - no delimiter in the payload - so the
//! reader never parses a body until all `N` bytes have arrived, however
//! the pipe chunks them.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (32 MiB). Diagrams for large
/// workspaces are sizeable but bounded.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame is missing a Content-Length header")]
    MissingContentLength,
    #[error("Content-Length {0:?} is not a valid byte count")]
    InvalidContentLength(String),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")]
    FrameTooLarge(usize),
    #[error("transport closed mid-frame")]
    TruncatedFrame,
    #[error("frame body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("server replied with an error: {0}")]
    ErrorReply(String),
    #[error("server reply had an unexpected shape: {0}")]
    UnexpectedReply(String),
}

/// Reads frames from the server's output stream.
pub struct FrameReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
        }
    }

    /// Read the next frame. `Ok(None)` on a clean EOF between frames.
    ///
    /// An [`InvalidBody`](ProtocolError::InvalidBody) error leaves the
    /// stream positioned at the next frame boundary - the declared body was
    /// fully consumed - so the caller may discard the frame and keep
    /// reading. Every other error means the stream is desynchronized.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, ProtocolError> {
        let Some(declared) = self.read_header_block().await? else {
            return Ok(None);
        };
        if declared > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge(declared));
        }

        // read_exact suspends until every declared byte is buffered, so a
        // body split across deliveries is reassembled before parsing.
        let mut body = vec![0u8; declared];
        self.input.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::TruncatedFrame
            } else {
                ProtocolError::Io(e)
            }
        })?;

        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Consume header lines up to the blank separator and return the
    /// declared body length. `Ok(None)` only on EOF before any header byte.
    async fn read_header_block(&mut self) -> Result<Option<usize>, ProtocolError> {
        let mut declared: Option<usize> = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                if started {
                    return Err(ProtocolError::TruncatedFrame);
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            if let Some((key, value)) = header.split_once(':')
                && key.trim().eq_ignore_ascii_case("content-length")
            {
                let value = value.trim();
                declared = Some(value.parse::<usize>().map_err(|_| {
                    ProtocolError::InvalidContentLength(value.to_string())
                })?);
            }
            // Unknown headers (Content-Type etc.) are tolerated and skipped.
        }

        declared
            .map(Some)
            .ok_or(ProtocolError::MissingContentLength)
    }
}

/// Writes frames to the server's input stream.
pub struct FrameWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Serialize `message` and write it as one length-prefixed frame.
    pub async fn write_frame<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.output.write_all(header.as_bytes()).await?;
        self.output.write_all(&body).await?;
        self.output.flush().await?;
        Ok(())
    }
}
