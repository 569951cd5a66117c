use std::io;

use thiserror::Error;

/// Everything that can go wrong in a transfer session.
///
/// `Transport` is fatal to the session. `Timeout`, `Protocol`, and
/// `Integrity` are recoverable where a retry loop exists (negotiation and
/// the upload path) and are logged-and-abandoned everywhere else.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("frame of {len} bytes exceeds the {max}-byte packet size")]
    OversizedFrame { len: usize, max: usize },

    #[error("packet size {0} out of range")]
    InvalidPacketSize(usize),

    #[error("timed out waiting for {phase}")]
    Timeout { phase: &'static str },

    #[error("protocol mismatch: expected {expected}, got '{got}'")]
    Protocol { expected: &'static str, got: String },

    #[error("integrity failure: declared {declared} bytes, received {received}")]
    Integrity { declared: u64, received: u64 },

    #[error("no '{0}' on the server")]
    NotFound(String),

    #[error("unsafe file name '{0}'")]
    UnsafeFileName(String),

    #[error("transfer failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("cancelled")]
    Cancelled,
}
