//! Capture-side errors.

use std::net::SocketAddr;

use detect_core::DetectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// No datagram arrived within the read timeout. Recoverable.
    #[error("timed out waiting for a packet")]
    Timeout,

    /// Datagram too short or with an odd payload. Recoverable.
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration-fatal decode or pipeline failure.
    #[error(transparent)]
    Decode(#[from] DetectError),

    /// The packet source or frame channel was closed.
    #[error("capture source disconnected")]
    Disconnected,
}

impl CaptureError {
    /// Errors that should not end an acquisition run.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Timeout | CaptureError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
