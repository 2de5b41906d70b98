//! Error types for the sample transport.
//!
//! Every variant is locally recoverable: the caller logs it, counts it and
//! moves on to the next sample.

use thiserror::Error;

/// Synchronous refusal from the indication transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No peer connected.
    #[error("no peer connected")]
    NotConnected,
    /// Service or characteristic not registered with the stack yet.
    #[error("characteristic not registered")]
    NotRegistered,
    /// Stack cannot accept another indication right now.
    #[error("transport busy")]
    Busy,
    /// Stack returned an error code.
    #[error("stack error {0}")]
    Stack(i32),
}

/// Failure of one trip through the transport pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// E01: Sample queue full, newest sample dropped
    #[error("sample queue full")]
    QueueFull,
    /// E02: Transport refused the indication synchronously
    #[error("indication rejected: {0}")]
    SendRejected(#[from] TransportError),
    /// E03: Peer or stack reported the indication as failed
    #[error("indication failed (status 0x{0:02x})")]
    AckFailed(u8),
    /// E04: No completion within the configured acknowledgment timeout
    #[error("indication not confirmed within {timeout_ms} ms")]
    AckTimeout { timeout_ms: u32 },
    /// E05: A timed-out indication was still unconfirmed; nothing was sent
    #[error("previous indication still unconfirmed after {timeout_ms} ms")]
    AckOutstanding { timeout_ms: u32 },
}

impl LinkError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull => "E01",
            Self::SendRejected(_) => "E02",
            Self::AckFailed(_) => "E03",
            Self::AckTimeout { .. } => "E04",
            Self::AckOutstanding { .. } => "E05",
        }
    }
}
