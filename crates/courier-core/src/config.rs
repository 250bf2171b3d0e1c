//! Connection configuration

use std::time::Duration;

/// Default request and idle-read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default port for TCP servers and clients
pub const DEFAULT_PORT: u16 = 25580;

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Both the request timeout and the idle-read timeout
    pub timeout: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Configuration for an outbound connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host to connect to (default: 127.0.0.1)
    pub host: String,
    /// Port to connect to (default: 25580)
    pub port: u16,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// `host:port` string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the client's connection
    pub fn messenger(&self) -> MessengerConfig {
        MessengerConfig {
            timeout: self.timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for a listening server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0)
    pub bind: String,
    /// Port to listen on, 0 picks a free port (default: 25580)
    pub port: u16,
    /// Request timeout applied to every accepted connection
    pub timeout: Duration,
}

impl ServerConfig {
    /// `bind:port` string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Settings for accepted connections
    pub fn messenger(&self) -> MessengerConfig {
        MessengerConfig {
            timeout: self.timeout,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
