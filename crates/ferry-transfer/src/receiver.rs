//! Receiving side of a transfer: accept the stream, accumulate chunk bytes
//! into a file until the terminator, then answer with the integrity verdict.
//!
//! "Corruption" in this protocol is a byte-count shortfall against the
//! declared size, not a content checksum. A corrupted file is kept on disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tracing::{trace, warn};

use crate::channel::DatagramChannel;
use crate::command::Command;
use crate::error::TransferError;
use crate::protocol::Frame;

#[derive(Debug, Clone, Copy)]
pub struct RecvOutcome {
    pub bytes_written: u64,
    /// Whether the declared size was reached; mirrors the verdict sent.
    pub complete: bool,
}

/// Receive one file's stream from `peer` into `dest`.
///
/// Opens (and truncates) the destination unconditionally, accepts with
/// `Waiting`, and counts every chunk byte until the `Upload Done`
/// terminator, after which the verdict (`Done` or `Corrupted`) is sent
/// back. The sender owns any resend decision.
pub fn receive_file(
    channel: &mut DatagramChannel,
    peer: SocketAddr,
    dest: &Path,
    declared: u64,
    packet_size: usize,
    phase_timeout: Duration,
) -> Result<RecvOutcome, TransferError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;
    channel.send_command(&Command::Waiting, packet_size, peer)?;
    let mut bytes_written: u64 = 0;
    loop {
        match channel.recv_frame_from(peer, Some(phase_timeout), "file data")? {
            Frame::Chunk(data) => {
                file.write_all(&data)?;
                bytes_written += data.len() as u64;
                trace!("{bytes_written}/{declared} bytes from {peer}");
            }
            Frame::Control(text) => match Command::parse(&text) {
                Ok(Command::UploadDone) => break,
                Ok(other) => warn!("ignoring '{other}' mid-stream from {peer}"),
                Err(e) => warn!("{peer}: {e}"),
            },
        }
    }
    file.sync_all()?;
    let complete = bytes_written >= declared;
    if !complete {
        warn!(
            "{}: only {bytes_written} of {declared} bytes before the terminator",
            dest.display()
        );
    }
    let verdict = if complete {
        Command::Done
    } else {
        Command::Corrupted
    };
    channel.send_command(&verdict, packet_size, peer)?;
    Ok(RecvOutcome {
        bytes_written,
        complete,
    })
}
