//! Custom error types for the daemon.
//!
//! This module defines the primary error type, `RoughError`, shared by the
//! transports, the device drivers and the safety monitor. Using the `thiserror`
//! crate, it keeps the error taxonomy in one place:
//!
//! - **Communication** (`Connect`, `Send`, `Receive`, `ReadTimeout`): the link to a
//!   device failed. These are never retried; the monitor treats them as a reason
//!   to fail closed, one-shot commands hand them back to the caller.
//! - **`Parse`**: a reply field that must be decimal or hex is not.
//! - **`Protocol`**: a gauge telegram is too mangled to extract a payload from.
//! - **`AlreadyRunning`**: a monitoring session was requested while one is active.
//! - **`Config`** / **`Configuration`**: loading or validating `RoughConfig`.
//!
//! A reply whose acknowledgement prefix does not echo the command is *not* an
//! error: it is reported as a warning observation and decoding continues.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the daemon error type.
pub type RoughResult<T> = std::result::Result<T, RoughError>;

/// All errors produced by the library.
#[derive(Error, Debug)]
pub enum RoughError {
    /// Could not open the TCP connection (includes connect timeouts).
    #[error("failed to connect to {device}: {source}")]
    Connect {
        /// Device name from the configuration.
        device: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The connection opened but the command could not be written.
    #[error("failed to send to {device}: {source}")]
    Send {
        /// Device name from the configuration.
        device: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the reply failed or the peer closed without replying.
    #[error("failed to read response from {device}: {source}")]
    Receive {
        /// Device name from the configuration.
        device: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// No reply arrived within the transport timeout.
    #[error("no response from {device} within {timeout:?}")]
    ReadTimeout {
        /// Device name from the configuration.
        device: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// A numeric field of a reply could not be decoded.
    #[error("cannot parse {field} from {value:?}: {reason}")]
    Parse {
        /// What the field was supposed to hold.
        field: String,
        /// The offending text.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A reply envelope is structurally unusable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A monitoring session is already active.
    #[error("monitor loop already running (period {interval:?}); stop it first")]
    AlreadyRunning {
        /// Period of the session that is still running.
        interval: Duration,
    },

    /// The configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl RoughError {
    /// True for the connect/send/receive/timeout family.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            RoughError::Connect { .. }
                | RoughError::Send { .. }
                | RoughError::Receive { .. }
                | RoughError::ReadTimeout { .. }
        )
    }

    pub(crate) fn parse(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        RoughError::Parse {
            field: field.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<figment::Error> for RoughError {
    fn from(err: figment::Error) -> Self {
        RoughError::Config(Box::new(err))
    }
}
