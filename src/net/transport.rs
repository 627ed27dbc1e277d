//! Message framing over a byte stream.
//!
//! # Responsibilities
//! - Split an inbound byte stream into frames: `]]>]]>` for structured RPC,
//!   a newline outside any open object for flat text
//! - Append the delimiter to outbound frames
//! - Enforce the maximum frame size
//!
//! # Design Decisions
//! - The read buffer is owned by the transport, so a `recv` cancelled by a
//!   timeout loses no bytes and can simply be retried
//! - Flat-text frames may span lines (pretty-printing peers) and may also
//!   end at EOF (one-shot peers write one object and shut down)
//! - A flat-text line that leaves an object open ends the frame when the
//!   next line starts a new object, or when nothing more arrives within the
//!   continuation grace; the codec then reports the cut-off object

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::protocol::TransportKind;

/// NETCONF 1.0 end-of-message marker.
pub const RPC_DELIMITER: &[u8] = b"]]>]]>";

pub const FLAT_DELIMITER: &[u8] = b"\n";

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// How long an open flat-text object waits for its next line.
pub const DEFAULT_CONTINUATION_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame ({pending} bytes pending)")]
    Closed { pending: usize },
}

/// A bidirectional frame channel.
#[async_trait]
pub trait Transport: Send {
    /// Write one frame. The delimiter is added by the transport.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read the next frame without its delimiter. `Ok(None)` is a clean EOF.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Flush and shut down the write half.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Delimiter-framed transport over any async stream.
#[derive(Debug)]
pub struct FramedTransport<S> {
    stream: S,
    kind: TransportKind,
    delimiter: &'static [u8],
    max_frame_bytes: usize,
    continuation_grace: Duration,
    /// When the open object at the end of the buffer stops waiting. Kept
    /// across cancelled receives.
    continuation_deadline: Option<Instant>,
    buffer: Vec<u8>,
    eof: bool,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, kind: TransportKind) -> Self {
        let delimiter = match kind {
            TransportKind::StructuredRpc => RPC_DELIMITER,
            TransportKind::FlatText => FLAT_DELIMITER,
        };
        Self {
            stream,
            kind,
            delimiter,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            continuation_grace: DEFAULT_CONTINUATION_GRACE,
            continuation_deadline: None,
            buffer: Vec::with_capacity(4096),
            eof: false,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_continuation_grace(mut self, grace: Duration) -> Self {
        self.continuation_grace = grace;
        self
    }

    fn scan(&self) -> Scan {
        match self.kind {
            TransportKind::StructuredRpc => match find(&self.buffer, self.delimiter) {
                Some(at) => Scan::Frame(at),
                None => Scan::Incomplete,
            },
            TransportKind::FlatText => flat_frame_end(&self.buffer),
        }
    }

    /// Remove the frame ending at `at` and its delimiter from the buffer.
    fn cut(&mut self, at: usize) -> Vec<u8> {
        let mut frame: Vec<u8> = self.buffer.drain(..at + self.delimiter.len()).collect();
        frame.truncate(at);
        frame
    }
}

/// Where the buffered bytes end their first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Frame(usize),
    /// A newline left an object open and nothing follows it yet.
    Dangling(usize),
    Incomplete,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Find the end of the first flat-text frame.
///
/// A newline closes the frame when no object is open. Inside an open object
/// it closes the frame only if the next line starts a new object; a newline
/// with nothing after it is reported as [`Scan::Dangling`].
fn flat_frame_end(buffer: &[u8]) -> Scan {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in buffer.iter().enumerate() {
        if b == b'\n' {
            // Strings never span lines.
            in_string = false;
            escaped = false;
            if depth <= 0 {
                return Scan::Frame(i);
            }
            match buffer[i + 1..].iter().find(|c| !c.is_ascii_whitespace()) {
                Some(b'{') => return Scan::Frame(i),
                Some(_) => continue,
                None => return Scan::Dangling(i),
            }
        }
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth -= 1,
            _ => {}
        }
    }
    Scan::Incomplete
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

#[async_trait]
impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut out = Vec::with_capacity(frame.len() + self.delimiter.len());
        out.extend_from_slice(frame);
        out.extend_from_slice(self.delimiter);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let dangling = match self.scan() {
                Scan::Frame(at) => {
                    let frame = self.cut(at);
                    // Pretty-printing peers leave whitespace between frames.
                    if is_blank(&frame) {
                        continue;
                    }
                    if frame.len() > self.max_frame_bytes {
                        return Err(TransportError::FrameTooLarge {
                            limit: self.max_frame_bytes,
                        });
                    }
                    return Ok(Some(frame));
                }
                Scan::Dangling(at) => Some(at),
                Scan::Incomplete => None,
            };

            if self.buffer.len() > self.max_frame_bytes + self.delimiter.len() {
                return Err(TransportError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }

            if self.eof {
                if is_blank(&self.buffer) {
                    self.buffer.clear();
                    return Ok(None);
                }
                if self.kind == TransportKind::FlatText {
                    return Ok(Some(std::mem::take(&mut self.buffer)));
                }
                return Err(TransportError::Closed {
                    pending: self.buffer.len(),
                });
            }

            let read = match dangling {
                Some(at) => {
                    let grace = self.continuation_grace;
                    let deadline = *self
                        .continuation_deadline
                        .get_or_insert_with(|| Instant::now() + grace);
                    let next = tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buffer)).await;
                    self.continuation_deadline = None;
                    match next {
                        Ok(read) => read?,
                        Err(_) => {
                            tracing::debug!(pending = at, "Open flat-text object ended without continuation");
                            return Ok(Some(self.cut(at)));
                        }
                    }
                }
                None => self.stream.read_buf(&mut self.buffer).await?,
            };
            if read == 0 {
                self.eof = true;
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
