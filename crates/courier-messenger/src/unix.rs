//! Unix socket transport
//!
//! Used when both processes share a host and a socket path.

use crate::transport::{FrameReader, FrameWriter};
use courier_core::{CourierError, Result};
use std::path::Path;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Unix socket read wrapper
pub type UnixReadWrapper = FrameReader<OwnedReadHalf>;

/// Unix socket write wrapper
pub type UnixWriteWrapper = FrameWriter<OwnedWriteHalf>;

/// Split an established stream into framed halves
pub fn into_framed(stream: UnixStream) -> (UnixReadWrapper, UnixWriteWrapper) {
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter(write_half))
}

/// Connect to the socket at `path`
pub async fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
    let path = path.as_ref();
    UnixStream::connect(path).await.map_err(|e| {
        CourierError::IpcError(format!("Failed to connect to {}: {}", path.display(), e))
    })
}
