//! Device transports
//!
//! A [`Transport`] carries one command to a device and returns its reply. The
//! pump and the gauge each get their own; drivers never see sockets.
//!
//! - [`TcpAdapter`]: one TCP connection per command, closed before returning
//! - [`MockAdapter`]: scripted replies for tests

pub mod mock_adapter;
pub mod tcp_adapter;

pub use mock_adapter::MockAdapter;
pub use tcp_adapter::TcpAdapter;

use crate::error::RoughResult;
use async_trait::async_trait;

/// Line terminator appended to every command.
pub const EOL: u8 = b'\r';

/// Request/response link to a single device.
///
/// Implementations keep no per-call state: every `send` is a complete
/// exchange and may fail with any of the communication errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Send `command` (terminator appended by the transport) and return the raw reply.
    async fn send(&self, command: &[u8]) -> RoughResult<Vec<u8>>;
}
