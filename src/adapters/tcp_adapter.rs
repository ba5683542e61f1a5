use super::{Transport, EOL};
use crate::config::DeviceConfig;
use crate::error::{RoughError, RoughResult};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Largest reply read from a device in one exchange.
const MAX_REPLY: usize = 1024;

/// TCP link to a device behind a terminal server
///
/// No connection is kept between commands. Each [`Transport::send`] connects,
/// writes the command plus terminator, reads one reply chunk and drops the
/// stream, so a stale or half-open socket can never leak into the next call.
#[derive(Debug, Clone)]
pub struct TcpAdapter {
    /// Device name (e.g., "pump", "gauge")
    name: String,

    /// Terminal server host
    host: String,

    /// Terminal server port
    port: u16,

    /// Applied separately to connect and to read
    timeout: Duration,
}

impl TcpAdapter {
    /// Create a new TCP adapter
    ///
    /// # Arguments
    /// * `name` - Device name for logs and errors
    /// * `host`, `port` - Where the device listens
    /// * `timeout` - Connect and read timeout
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Create an adapter from a device configuration block.
    pub fn from_config(name: impl Into<String>, config: &DeviceConfig) -> Self {
        Self::new(name, config.host.clone(), config.port, config.timeout())
    }

    /// `host:port` this adapter connects to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> RoughResult<TcpStream> {
        let address = self.address();
        match timeout(self.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(RoughError::Connect {
                device: self.name.clone(),
                source,
            }),
            Err(_) => Err(RoughError::Connect {
                device: self.name.clone(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {address} timed out after {:?}", self.timeout),
                ),
            }),
        }
    }

    async fn exchange(&self, full_command: &[u8]) -> RoughResult<Vec<u8>> {
        // Dropped on every return path below, which closes the connection.
        let mut stream = self.connect().await?;

        match timeout(self.timeout, stream.write_all(full_command)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(RoughError::Send {
                    device: self.name.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(RoughError::Send {
                    device: self.name.clone(),
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write timed out after {:?}", self.timeout),
                    ),
                })
            }
        }

        let mut buffer = vec![0u8; MAX_REPLY];
        let n = match timeout(self.timeout, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => {
                return Err(RoughError::Receive {
                    device: self.name.clone(),
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before a reply arrived",
                    ),
                })
            }
            Ok(Ok(n)) => n,
            Ok(Err(source)) => {
                return Err(RoughError::Receive {
                    device: self.name.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(RoughError::ReadTimeout {
                    device: self.name.clone(),
                    timeout: self.timeout,
                })
            }
        };
        buffer.truncate(n);
        Ok(buffer)
    }
}

#[async_trait]
impl Transport for TcpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: &[u8]) -> RoughResult<Vec<u8>> {
        let mut full_command = Vec::with_capacity(command.len() + 1);
        full_command.extend_from_slice(command);
        full_command.push(EOL);

        debug!(device = %self.name, "sending {:?}", String::from_utf8_lossy(&full_command));

        let result = self.exchange(&full_command).await;

        match &result {
            Ok(reply) => debug!(device = %self.name, "received {:?}", String::from_utf8_lossy(reply)),
            Err(e) => warn!(device = %self.name, "exchange with {} failed: {e}", self.address()),
        }
        result
    }
}
