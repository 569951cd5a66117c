//! Streaming side of a transfer: chunk a file onto the wire, terminate the
//! stream, and collect the receiver's verdict.
//!
//! Used by the client for uploads and by the server for downloads. The
//! bounded resend loop on a `Corrupted` verdict lives in the callers; it
//! exists on the upload path only.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::channel::DatagramChannel;
use crate::command::Command;
use crate::error::TransferError;
use crate::protocol::chunk_capacity;

/// The receiver's integrity verdict for one streamed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVerdict {
    Done,
    Corrupted,
}

/// Stream one file to `peer` as chunk frames followed by the terminator,
/// then wait for the verdict. `pace` is the pause between datagrams, a
/// naive substitute for real flow control.
pub fn stream_file(
    channel: &mut DatagramChannel,
    peer: SocketAddr,
    path: &Path,
    packet_size: usize,
    pace: Duration,
    phase_timeout: Duration,
) -> Result<StreamVerdict, TransferError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = vec![0u8; chunk_capacity(packet_size)];
    let mut sent: u64 = 0;
    loop {
        let n = read_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        thread::sleep(pace);
        channel.send_chunk(&buf[..n], peer)?;
        sent += n as u64;
    }
    debug!("streamed {sent} bytes of {} to {peer}", path.display());
    channel.send_command(&Command::UploadDone, packet_size, peer)?;
    match channel.recv_command_from(peer, Some(phase_timeout), "transfer verdict")? {
        Command::Done => Ok(StreamVerdict::Done),
        Command::Corrupted => Ok(StreamVerdict::Corrupted),
        other => Err(TransferError::Protocol {
            expected: "Done or Corrupted",
            got: other.to_string(),
        }),
    }
}

/// Exponential backoff before resend attempt `attempt` (zero-based).
pub fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(6))
}

fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_chunk_fills_and_then_drains() {
        let mut reader = Cursor::new(vec![7u8; 10]);
        let mut buf = [0u8; 4];
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_backoff(base, 0), Duration::from_millis(100));
        assert_eq!(retry_backoff(base, 1), Duration::from_millis(200));
        assert_eq!(retry_backoff(base, 2), Duration::from_millis(400));
        assert_eq!(retry_backoff(base, 60), retry_backoff(base, 6));
    }
}
