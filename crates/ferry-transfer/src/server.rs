//! Server accept loop.
//!
//! A single socket shared by the control protocol and every peer's data.
//! The loop is the sole serialization point: one transfer runs to
//! completion before the next datagram is read, and frames from other
//! peers arriving mid-transfer are dropped rather than interleaved.
//!
//! Per-peer state is explicit: the negotiated packet size is scoped to the
//! peer that asked for it, so one client's `Size` request never changes the
//! size used for anyone else. `Disconnect` removes the entry, so the same
//! address is treated as a new client, at the default size, on its next
//! datagram.

use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::DatagramChannel;
use crate::command::Command;
use crate::error::TransferError;
use crate::naming;
use crate::protocol::{Frame, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use crate::receiver;
use crate::sender::{self, StreamVerdict};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Packet size for peers that never negotiate another one.
    pub packet_size: usize,
    /// Directory served to download requests.
    pub send_dir: PathBuf,
    /// Directory uploads are written into.
    pub recv_dir: PathBuf,
    pub pace: Duration,
    pub phase_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            send_dir: PathBuf::from("ferry-send"),
            recv_dir: PathBuf::from("ferry-recv"),
            pace: Duration::from_millis(5),
            phase_timeout: Duration::from_secs(5),
        }
    }
}

struct PeerState {
    packet_size: usize,
}

pub struct Server {
    channel: DatagramChannel,
    config: ServerConfig,
    peers: HashMap<SocketAddr, PeerState>,
}

impl Server {
    /// Wrap a pre-bound socket. Taking the socket instead of an address
    /// lets the caller learn the port before the loop starts.
    pub fn new(
        socket: UdpSocket,
        config: ServerConfig,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self, TransferError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&config.packet_size) {
            return Err(TransferError::InvalidPacketSize(config.packet_size));
        }
        fs::create_dir_all(&config.send_dir)?;
        fs::create_dir_all(&config.recv_dir)?;
        let channel = DatagramChannel::new(socket, cancelled)?;
        Ok(Self {
            channel,
            config,
            peers: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        self.channel.local_addr()
    }

    /// Serve until the cancellation flag is set. Session-level failures are
    /// logged and the loop keeps serving; only transport loss is fatal.
    pub fn run(&mut self) -> Result<(), TransferError> {
        info!("listening on {}", self.local_addr()?);
        loop {
            let (frame, peer) = match self.channel.recv_frame(None, "request") {
                Ok(received) => received,
                Err(TransferError::Cancelled) => {
                    info!("shutting down");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if !self.peers.contains_key(&peer) {
                info!("new client {peer}");
                self.peers.insert(
                    peer,
                    PeerState {
                        packet_size: self.config.packet_size,
                    },
                );
            }
            let text = match frame {
                Frame::Control(text) => text,
                Frame::Chunk(data) => {
                    warn!("dropping {} chunk bytes from {peer} outside a transfer", data.len());
                    continue;
                }
            };
            let cmd = match Command::parse(&text) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("{peer}: {e}");
                    continue;
                }
            };
            if let Err(e) = self.dispatch(peer, cmd) {
                match e {
                    TransferError::Cancelled => {
                        info!("shutting down");
                        return Ok(());
                    }
                    TransferError::Transport(_) => return Err(e),
                    e => warn!("{peer}: session ended: {e}"),
                }
            }
        }
    }

    fn peer_size(&self, peer: SocketAddr) -> usize {
        self.peers
            .get(&peer)
            .map(|p| p.packet_size)
            .unwrap_or(self.config.packet_size)
    }

    fn dispatch(&mut self, peer: SocketAddr, cmd: Command) -> Result<(), TransferError> {
        match cmd {
            Command::Size(n) => self.change_packet_size(peer, n),
            Command::Upload { name, size } => self.receive_upload(peer, &name, size),
            Command::Download { name } => self.serve_download(peer, &name),
            Command::Disconnect => self.disconnect(peer),
            other => {
                warn!("{peer}: unexpected '{other}' outside a transfer");
                Ok(())
            }
        }
    }

    fn change_packet_size(&mut self, peer: SocketAddr, size: usize) -> Result<(), TransferError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            warn!("{peer}: refusing packet size {size}");
            return Ok(());
        }
        if let Some(state) = self.peers.get_mut(&peer) {
            state.packet_size = size;
        }
        info!("{peer}: packet size now {size} bytes");
        // The confirmation is already padded to the new size.
        self.channel
            .send_command(&Command::NewSize(size), size, peer)
    }

    /// Upload path: accept unconditionally, count bytes, send the verdict.
    /// The client owns the resend loop.
    fn receive_upload(
        &mut self,
        peer: SocketAddr,
        name: &str,
        declared: u64,
    ) -> Result<(), TransferError> {
        let packet_size = self.peer_size(peer);
        let name = naming::safe_file_name(name)?;
        let dest = self.config.recv_dir.join(name);
        info!("{peer}: receiving '{name}' ({declared} bytes)");
        let outcome = receiver::receive_file(
            &mut self.channel,
            peer,
            &dest,
            declared,
            packet_size,
            self.config.phase_timeout,
        )?;
        if outcome.complete {
            info!("{peer}: '{name}' stored ({} bytes)", outcome.bytes_written);
        } else {
            warn!(
                "{peer}: '{name}' corrupted ({} of {declared} bytes), awaiting resend",
                outcome.bytes_written
            );
        }
        Ok(())
    }

    /// Download path: offer the file or reject, then stream it. A
    /// `Corrupted` verdict here is abandoned; the resend loop exists on
    /// the upload path only.
    fn serve_download(&mut self, peer: SocketAddr, name: &str) -> Result<(), TransferError> {
        let packet_size = self.peer_size(peer);
        let name = naming::safe_file_name(name)?;
        let path = self.config.send_dir.join(name);
        let size = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                info!("{peer}: no '{name}' to send");
                return self.channel.send_command(
                    &Command::No {
                        name: name.to_string(),
                    },
                    packet_size,
                    peer,
                );
            }
        };
        self.channel.send_command(
            &Command::Sending {
                name: name.to_string(),
                size,
            },
            packet_size,
            peer,
        )?;
        match self.channel.recv_command_from(
            peer,
            Some(self.config.phase_timeout),
            "download acceptance",
        )? {
            Command::Waiting => {}
            other => {
                return Err(TransferError::Protocol {
                    expected: "Waiting",
                    got: other.to_string(),
                })
            }
        }
        match sender::stream_file(
            &mut self.channel,
            peer,
            &path,
            packet_size,
            self.config.pace,
            self.config.phase_timeout,
        )? {
            StreamVerdict::Done => info!("{peer}: sent '{name}' ({size} bytes)"),
            StreamVerdict::Corrupted => {
                warn!("{peer}: reports '{name}' corrupted; abandoning")
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, peer: SocketAddr) -> Result<(), TransferError> {
        let packet_size = self.peer_size(peer);
        self.peers.remove(&peer);
        info!("client {peer} disconnected");
        self.channel
            .send_command(&Command::Disconnected, packet_size, peer)
    }
}
