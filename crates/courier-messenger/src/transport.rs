//! Transport abstractions for courier connections
//!
//! Provides AsyncReader/AsyncWriter traits plus the sentinel-framed
//! implementations used over any byte stream (TCP, Unix sockets, pipes).

use async_trait::async_trait;
use courier_core::{CourierError, INVALID_MESSAGE_PREFIX, Result, SENTINEL};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, warn};

/// Upper bound on one buffered frame (64MB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// One unit read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text of one message, sentinel stripped
    Message(String),
    /// The peer sent an `Invalid Message:` notice; holds the description
    Rejected(String),
    /// The stream reached EOF
    Closed,
}

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read the next complete frame.
    ///
    /// Must be cancel safe: dropping the future before it completes must
    /// not lose buffered input.
    async fn read_frame(&mut self) -> Result<Frame>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Write raw bytes and flush
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;

    /// Shut the write side down
    async fn shutdown(&mut self) -> Result<()>;
}

/// Sentinel-framed reader over any byte stream
///
/// Lines are accumulated until a `---` line. Partial input lives in the
/// struct, so a cancelled `read_frame` resumes where it left off.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a newline
    scanned: usize,
    lines: Vec<String>,
    buffered: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            lines: Vec::new(),
            buffered: 0,
            eof: false,
        }
    }

    /// Pop one complete line off the byte buffer
    fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let pos = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Feed buffered lines through the framing rules
    fn take_frame(&mut self) -> Option<Frame> {
        while let Some(line) = self.next_line() {
            if line == SENTINEL {
                let text = self.lines.join("\n");
                self.lines.clear();
                self.buffered = 0;
                return Some(Frame::Message(text));
            }

            if let Some(description) = line.strip_prefix(INVALID_MESSAGE_PREFIX) {
                if !self.lines.is_empty() {
                    debug!("Discarding {} buffered lines after rejection notice", self.lines.len());
                }
                self.lines.clear();
                self.buffered = 0;
                return Some(Frame::Rejected(description.trim().to_string()));
            }

            // Skip blank lines between frames
            if line.is_empty() && self.lines.is_empty() {
                continue;
            }

            self.buffered += line.len() + 1;
            self.lines.push(line);
        }
        None
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for FrameReader<R> {
    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(frame);
            }

            if self.buffered + self.buf.len() > MAX_FRAME_LEN {
                return Err(CourierError::IpcError(format!(
                    "Message too large: {} bytes",
                    self.buffered + self.buf.len()
                )));
            }

            if self.eof {
                if !self.lines.is_empty() || !self.buf.is_empty() {
                    warn!("Stream closed with an unterminated frame, dropping it");
                    self.lines.clear();
                    self.buf.clear();
                    self.scanned = 0;
                    self.buffered = 0;
                }
                return Ok(Frame::Closed);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(|e| CourierError::IpcError(format!("Read failed: {}", e)))?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Writer over any byte stream
pub struct FrameWriter<W>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriter for FrameWriter<W> {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        self.0
            .write_all(data)
            .await
            .map_err(|e| CourierError::IpcError(format!("Write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.0
            .flush()
            .await
            .map_err(|e| CourierError::IpcError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.0
            .shutdown()
            .await
            .map_err(|e| CourierError::IpcError(format!("Shutdown failed: {}", e)))
    }
}

/// Split any bidirectional stream into framed halves
pub fn split<S>(stream: S) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (FrameReader::new(read_half), FrameWriter(write_half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"{\"id\":")
            .read(b"1}\n-")
            .read(b"--\n")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Message("{\"id\":1}".into())
        );
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Closed);
    }

    #[tokio::test]
    async fn test_multiline_message_and_two_frames() {
        let mock = Builder::new()
            .read(b"\n{\"a\":\n1}\n---\r\n{\"b\":2}\n---\n")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Message("{\"a\":\n1}".into())
        );
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Message("{\"b\":2}".into())
        );
    }

    #[tokio::test]
    async fn test_rejection_notice_discards_buffer() {
        let mock = Builder::new()
            .read(b"{\"broken\"\nInvalid Message: Malformed message: bad\n{\"ok\":1}\n---\n")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Rejected("Malformed message: bad".into())
        );
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Message("{\"ok\":1}".into())
        );
    }

    #[tokio::test]
    async fn test_eof_drops_unterminated_frame() {
        let mock = Builder::new().read(b"{\"partial\":true}\n").build();
        let mut reader = FrameReader::new(mock);
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Closed);
    }

    #[tokio::test]
    async fn test_partial_line_is_not_rescanned() {
        let mock = Builder::new().read(b"{\"long\":").read(b"\"value\"}\n---\n").build();
        let mut reader = FrameReader::new(mock);

        reader.buf.extend_from_slice(b"abc");
        assert!(reader.take_frame().is_none());
        assert_eq!(reader.scanned, 3);
        reader.buf.clear();
        reader.scanned = 0;

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Message("{\"long\":\"value\"}".into())
        );
        assert_eq!(reader.scanned, 0);
    }

    #[tokio::test]
    async fn test_multi_megabyte_line_reads_promptly() {
        const LEN: usize = 16 * 1024 * 1024;
        let (raw, framed) = tokio::io::duplex(64 * 1024);
        let (mut reader, _writer) = split(framed);

        let writer = tokio::spawn(async move {
            let mut raw = raw;
            let mut frame = vec![b'x'; LEN];
            frame.extend_from_slice(b"\n---\n");
            raw.write_all(&frame).await.unwrap();
            raw
        });

        let frame = tokio::time::timeout(std::time::Duration::from_secs(20), reader.read_frame())
            .await
            .expect("reading a long line should be linear in its length")
            .unwrap();
        match frame {
            Frame::Message(text) => assert_eq!(text.len(), LEN),
            other => panic!("Unexpected frame: {:?}", other),
        }
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_writer_passes_bytes_through() {
        let mock = Builder::new().write(b"{}\n---\n").build();
        let mut writer = FrameWriter(mock);
        writer.write_message(b"{}\n---\n").await.unwrap();
    }
}
