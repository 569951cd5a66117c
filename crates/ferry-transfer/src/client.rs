//! Client session orchestrator.
//!
//! Sequence: optional size negotiation, one transfer session per requested
//! file (strictly sequential), then the disconnect exchange. Uploads own
//! the bounded resend loop; downloads are logged and abandoned on a
//! `Corrupted` verdict or a `No <name>` rejection.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::DatagramChannel;
use crate::command::Command;
use crate::error::TransferError;
use crate::naming;
use crate::protocol::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use crate::receiver::{self, RecvOutcome};
use crate::sender::{self, StreamVerdict};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub packet_size: usize,
    pub download_dir: PathBuf,
    /// Pause between outgoing chunk datagrams.
    pub pace: Duration,
    /// Bound on every blocking wait for one protocol phase.
    pub phase_timeout: Duration,
    /// Total attempts for negotiation and for one file's upload.
    pub max_attempts: u32,
    /// Base of the exponential backoff between attempts.
    pub retry_backoff: Duration,
}

impl ClientConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            packet_size: DEFAULT_PACKET_SIZE,
            download_dir: PathBuf::from("downloads"),
            pace: Duration::from_millis(5),
            phase_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// One requested transfer.
#[derive(Debug, Clone)]
pub enum TransferJob {
    Upload(PathBuf),
    Download(String),
}

#[derive(Debug)]
pub enum TransferOutcome {
    Uploaded { bytes: u64 },
    Downloaded { bytes: u64 },
    /// The server has no such file.
    Rejected,
    /// Fewer bytes than declared arrived; the download was abandoned.
    Corrupted { bytes: u64 },
    Failed(TransferError),
}

#[derive(Debug)]
pub struct TransferReport {
    pub name: String,
    pub outcome: TransferOutcome,
}

pub struct ClientSession {
    channel: DatagramChannel,
    server: SocketAddr,
    /// Packet size currently in force; starts at the default and follows a
    /// successful negotiation.
    packet_size: usize,
    config: ClientConfig,
}

impl ClientSession {
    /// Bind a local socket and negotiate the packet size if the configured
    /// one differs from the default.
    pub fn connect(config: ClientConfig) -> Result<Self, TransferError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&config.packet_size) {
            return Err(TransferError::InvalidPacketSize(config.packet_size));
        }
        let bind_ip: IpAddr = if config.server.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))?;
        let channel = DatagramChannel::new(socket, Arc::new(AtomicBool::new(false)))?;
        let mut session = Self {
            channel,
            server: config.server,
            packet_size: DEFAULT_PACKET_SIZE,
            config,
        };
        session.negotiate()?;
        Ok(session)
    }

    /// Request the configured packet size. Idempotent: repeating the request
    /// for the size already in force leaves both peers agreeing on it.
    pub fn negotiate(&mut self) -> Result<(), TransferError> {
        let want = self.config.packet_size;
        if want == DEFAULT_PACKET_SIZE && self.packet_size == DEFAULT_PACKET_SIZE {
            return Ok(());
        }
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            // The request travels padded to the size in force before the
            // switch; the confirmation arrives padded to the new size.
            self.channel
                .send_command(&Command::Size(want), self.packet_size, self.server)?;
            match self.channel.recv_command_from(
                self.server,
                Some(self.config.phase_timeout),
                "size confirmation",
            ) {
                Ok(Command::NewSize(n)) if n == want => {
                    self.packet_size = want;
                    info!("packet size now {want} bytes");
                    return Ok(());
                }
                Ok(other) => {
                    return Err(TransferError::Protocol {
                        expected: "New Size",
                        got: other.to_string(),
                    })
                }
                Err(e @ TransferError::Timeout { .. }) => {
                    attempt += 1;
                    if attempt >= max {
                        return Err(TransferError::RetriesExhausted { attempts: attempt });
                    }
                    warn!("size negotiation: {e}, retrying");
                    thread::sleep(sender::retry_backoff(self.config.retry_backoff, attempt - 1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Upload one file, resending the whole stream on a `Corrupted` verdict
    /// up to the attempt cap.
    pub fn upload(&mut self, path: &Path) -> Result<u64, TransferError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::UnsafeFileName(path.display().to_string()))?
            .to_string();
        let declared = fs::metadata(path)?.len();
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match self.try_upload(path, &name, declared) {
                Ok(StreamVerdict::Done) => {
                    info!("uploaded '{name}' ({declared} bytes) in {} attempt(s)", attempt + 1);
                    return Ok(declared);
                }
                Ok(StreamVerdict::Corrupted) => {
                    warn!("'{name}' arrived corrupted at the server, resending")
                }
                Err(e @ TransferError::Timeout { .. }) => warn!("'{name}': {e}, retrying"),
                Err(e) => return Err(e),
            }
            attempt += 1;
            if attempt >= max {
                return Err(TransferError::RetriesExhausted { attempts: attempt });
            }
            thread::sleep(sender::retry_backoff(self.config.retry_backoff, attempt - 1));
        }
    }

    fn try_upload(
        &mut self,
        path: &Path,
        name: &str,
        declared: u64,
    ) -> Result<StreamVerdict, TransferError> {
        self.channel.send_command(
            &Command::Upload {
                name: name.to_string(),
                size: declared,
            },
            self.packet_size,
            self.server,
        )?;
        match self.channel.recv_command_from(
            self.server,
            Some(self.config.phase_timeout),
            "upload acceptance",
        )? {
            Command::Waiting => {}
            other => {
                return Err(TransferError::Protocol {
                    expected: "Waiting",
                    got: other.to_string(),
                })
            }
        }
        sender::stream_file(
            &mut self.channel,
            self.server,
            path,
            self.packet_size,
            self.config.pace,
            self.config.phase_timeout,
        )
    }

    /// Download one file into the download directory. No retry: a rejection
    /// or a corrupted arrival ends the session for this file.
    pub fn download(&mut self, name: &str) -> Result<RecvOutcome, TransferError> {
        let name = naming::safe_file_name(name)?;
        self.channel.send_command(
            &Command::Download {
                name: name.to_string(),
            },
            self.packet_size,
            self.server,
        )?;
        match self.channel.recv_command_from(
            self.server,
            Some(self.config.phase_timeout),
            "download offer",
        )? {
            Command::No { name: absent } => {
                info!("'{absent}' is not on the server");
                Err(TransferError::NotFound(absent))
            }
            Command::Sending {
                name: offered,
                size,
            } => {
                if offered != name {
                    warn!("server is sending '{offered}' for requested '{name}'");
                }
                fs::create_dir_all(&self.config.download_dir)?;
                let dest = self.config.download_dir.join(name);
                let outcome = receiver::receive_file(
                    &mut self.channel,
                    self.server,
                    &dest,
                    size,
                    self.packet_size,
                    self.config.phase_timeout,
                )?;
                if outcome.complete {
                    info!("downloaded '{name}' ({} bytes)", outcome.bytes_written);
                } else {
                    // The resend loop exists on the upload path only; a
                    // corrupted download is logged and abandoned.
                    warn!("'{name}' corrupted: {} of {size} bytes", outcome.bytes_written);
                }
                Ok(outcome)
            }
            other => Err(TransferError::Protocol {
                expected: "Sending or No",
                got: other.to_string(),
            }),
        }
    }

    /// Tear the session down. Best-effort: a lost confirmation is logged,
    /// not retried.
    pub fn disconnect(mut self) -> Result<(), TransferError> {
        self.channel
            .send_command(&Command::Disconnect, self.packet_size, self.server)?;
        match self.channel.recv_command_from(
            self.server,
            Some(self.config.phase_timeout),
            "disconnect confirmation",
        ) {
            Ok(Command::Disconnected) => info!("disconnected from {}", self.server),
            Ok(other) => warn!("unexpected '{other}' at teardown"),
            Err(TransferError::Timeout { .. }) => warn!("no disconnect confirmation; leaving anyway"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Process all jobs in order, then disconnect. Per-file failures are
    /// recorded and the remaining files still run; session-fatal errors
    /// (transport loss, cancellation) abort the whole run.
    pub fn run(mut self, jobs: Vec<TransferJob>) -> Result<Vec<TransferReport>, TransferError> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let report = match job {
                TransferJob::Upload(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    match self.upload(&path) {
                        Ok(bytes) => TransferReport {
                            name,
                            outcome: TransferOutcome::Uploaded { bytes },
                        },
                        Err(e) if is_fatal(&e) => return Err(e),
                        Err(e) => TransferReport {
                            name,
                            outcome: TransferOutcome::Failed(e),
                        },
                    }
                }
                TransferJob::Download(name) => {
                    let outcome = match self.download(&name) {
                        Ok(recv) if recv.complete => TransferOutcome::Downloaded {
                            bytes: recv.bytes_written,
                        },
                        Ok(recv) => TransferOutcome::Corrupted {
                            bytes: recv.bytes_written,
                        },
                        Err(TransferError::NotFound(_)) => TransferOutcome::Rejected,
                        Err(e) if is_fatal(&e) => return Err(e),
                        Err(e) => TransferOutcome::Failed(e),
                    };
                    TransferReport { name, outcome }
                }
            };
            reports.push(report);
        }
        self.disconnect()?;
        Ok(reports)
    }
}

fn is_fatal(e: &TransferError) -> bool {
    matches!(e, TransferError::Transport(_) | TransferError::Cancelled)
}
