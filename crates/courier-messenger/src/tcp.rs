//! TCP transport
//!
//! The default transport for clients and servers on separate hosts.

use crate::transport::{FrameReader, FrameWriter};
use courier_core::{CourierError, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// TCP read wrapper
pub type TcpReadWrapper = FrameReader<OwnedReadHalf>;

/// TCP write wrapper
pub type TcpWriteWrapper = FrameWriter<OwnedWriteHalf>;

/// Prepare an established stream and split it into framed halves
pub fn into_framed(stream: TcpStream) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    // Disable Nagle's algorithm for low latency
    stream
        .set_nodelay(true)
        .map_err(|e| CourierError::IpcError(format!("Failed to set TCP_NODELAY: {}", e)))?;

    let (read_half, write_half) = stream.into_split();
    Ok((FrameReader::new(read_half), FrameWriter(write_half)))
}

/// Dial `addr` with a connection timeout
pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("Dialing {}", addr);
    tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| CourierError::IpcError(format!("Connection timeout to {}", addr)))?
        .map_err(|e| CourierError::IpcError(format!("Failed to connect to {}: {}", addr, e)))
}
