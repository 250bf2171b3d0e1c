//! Listening sockets

use courier_core::{CourierError, Result};
use courier_messenger::{Messenger, MessengerBuilder, tcp};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// A bound socket that yields framed connections
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
}

impl Listener {
    pub async fn bind_tcp(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CourierError::IpcError(format!("Failed to bind {}: {}", addr, e)))?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Listener::Tcp(listener))
    }

    /// Bind a Unix socket, replacing a stale socket file at `path`
    #[cfg(unix)]
    pub fn bind_unix(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = tokio::net::UnixListener::bind(&path).map_err(|e| {
            CourierError::IpcError(format!("Failed to bind {}: {}", path.display(), e))
        })?;
        info!("Listening on {}", path.display());
        Ok(Listener::Unix { listener, path })
    }

    /// TCP address, if this is a TCP listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix { .. } => None,
        }
    }

    /// Wait for the next connection
    pub async fn accept(&self) -> Result<MessengerBuilder> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                let (reader, writer) = tcp::into_framed(stream)?;
                Ok(Messenger::builder(reader, writer).peer(addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                let (reader, writer) = courier_messenger::unix::into_framed(stream);
                Ok(Messenger::builder(reader, writer).peer(path.display().to_string()))
            }
        }
    }

    /// Remove the socket file of a Unix listener
    pub fn cleanup(&self) {
        #[cfg(unix)]
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
