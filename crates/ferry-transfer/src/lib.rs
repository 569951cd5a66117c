//! ferry: UDP file transfer over framed datagrams.
//!
//! A client and server negotiate a datagram size, then stream one file at a
//! time over a single UDP socket: control commands as space-padded text
//! frames, file bytes as raw chunk frames. Integrity is a byte-count check
//! at the end-of-stream terminator; a shortfall triggers a bounded
//! whole-file resend on the upload path.

pub mod channel;
pub mod client;
pub mod command;
pub mod error;
pub mod naming;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod server;

// Re-export key types for convenience.
pub use channel::DatagramChannel;
pub use client::{ClientConfig, ClientSession, TransferJob, TransferOutcome, TransferReport};
pub use command::Command;
pub use error::TransferError;
pub use protocol::{
    chunk_capacity, Frame, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE,
};
pub use receiver::{receive_file, RecvOutcome};
pub use sender::{stream_file, StreamVerdict};
pub use server::{Server, ServerConfig};
