//! One unreliable, connectionless endpoint.
//!
//! The channel moves whole datagrams and nothing more: no ordering,
//! delivery, or deduplication guarantees. Receives are bounded: the
//! blocking `recv_from` is driven through a short OS read timeout so the
//! deadline and the cancellation flag are observed between polls.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::command::Command;
use crate::error::TransferError;
use crate::protocol::{self, Frame, MAX_PACKET_SIZE};

/// Granularity of the receive poll loop.
const POLL_TICK: Duration = Duration::from_millis(50);

pub struct DatagramChannel {
    socket: UdpSocket,
    cancelled: Arc<AtomicBool>,
    buf: Vec<u8>,
}

impl DatagramChannel {
    pub fn new(socket: UdpSocket, cancelled: Arc<AtomicBool>) -> Result<Self, TransferError> {
        socket.set_read_timeout(Some(POLL_TICK))?;
        Ok(Self {
            socket,
            cancelled,
            buf: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.socket.local_addr()?)
    }

    /// Transmit one datagram.
    pub fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransferError> {
        if frame.len() > MAX_PACKET_SIZE {
            return Err(TransferError::OversizedFrame {
                len: frame.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        self.socket.send_to(frame, dest)?;
        Ok(())
    }

    /// Send a command padded to `packet_size`.
    pub fn send_command(
        &self,
        cmd: &Command,
        packet_size: usize,
        dest: SocketAddr,
    ) -> Result<(), TransferError> {
        let frame = protocol::encode_control(&cmd.to_string(), packet_size)?;
        self.send_to(&frame, dest)
    }

    /// Send one chunk of raw file bytes.
    pub fn send_chunk(&self, payload: &[u8], dest: SocketAddr) -> Result<(), TransferError> {
        let frame = protocol::encode_chunk(payload);
        self.send_to(&frame, dest)
    }

    /// Block until one datagram arrives. `deadline: None` waits until
    /// cancellation; otherwise expiry yields `Timeout { phase }`.
    pub fn recv_datagram(
        &mut self,
        deadline: Option<Duration>,
        phase: &'static str,
    ) -> Result<(Vec<u8>, SocketAddr), TransferError> {
        let expires = deadline.map(|d| Instant::now() + d);
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(TransferError::Cancelled);
            }
            if let Some(at) = expires {
                if Instant::now() >= at {
                    return Err(TransferError::Timeout { phase });
                }
            }
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, src)) => return Ok((self.buf[..len].to_vec(), src)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                // ICMP port unreachable surfaces as ConnectionReset on some
                // platforms; not fatal for a connectionless socket.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
                Err(e) => return Err(TransferError::Transport(e)),
            }
        }
    }

    /// Receive the next well-formed frame; malformed datagrams are dropped.
    pub fn recv_frame(
        &mut self,
        deadline: Option<Duration>,
        phase: &'static str,
    ) -> Result<(Frame, SocketAddr), TransferError> {
        let expires = deadline.map(|d| Instant::now() + d);
        loop {
            let remaining = expires.map(|at| at.saturating_duration_since(Instant::now()));
            let (datagram, src) = self.recv_datagram(remaining, phase)?;
            match protocol::decode(&datagram) {
                Some(frame) => return Ok((frame, src)),
                None => warn!(
                    "dropping malformed {}-byte datagram from {src}",
                    datagram.len()
                ),
            }
        }
    }

    /// Receive the next frame from `peer`; frames from other endpoints are
    /// dropped so one session cannot be corrupted by another peer's traffic.
    pub fn recv_frame_from(
        &mut self,
        peer: SocketAddr,
        deadline: Option<Duration>,
        phase: &'static str,
    ) -> Result<Frame, TransferError> {
        let expires = deadline.map(|d| Instant::now() + d);
        loop {
            let remaining = expires.map(|at| at.saturating_duration_since(Instant::now()));
            let (frame, src) = self.recv_frame(remaining, phase)?;
            if src == peer {
                return Ok(frame);
            }
            warn!("dropping frame from {src} while serving {peer}");
        }
    }

    /// Receive a control command from `peer`. Stray chunks are dropped; a
    /// control frame that is not a known command is a `Protocol` error.
    pub fn recv_command_from(
        &mut self,
        peer: SocketAddr,
        deadline: Option<Duration>,
        phase: &'static str,
    ) -> Result<Command, TransferError> {
        let expires = deadline.map(|d| Instant::now() + d);
        loop {
            let remaining = expires.map(|at| at.saturating_duration_since(Instant::now()));
            match self.recv_frame_from(peer, remaining, phase)? {
                Frame::Control(text) => return Command::parse(&text),
                Frame::Chunk(data) => {
                    warn!(
                        "dropping {} stray chunk bytes while waiting for {phase}",
                        data.len()
                    );
                }
            }
        }
    }
}
