//! Integration tests: real transfers over UDP loopback sockets.
//!
//! Each test binds a server on an ephemeral port, runs a client against it,
//! and verifies the bytes on disk. Fixtures live under the OS temp dir and
//! are removed on success.

use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};

use ferry_transfer::client::{ClientConfig, ClientSession, TransferJob, TransferOutcome};
use ferry_transfer::command::Command;
use ferry_transfer::error::TransferError;
use ferry_transfer::protocol::{self, chunk_capacity, Frame, DEFAULT_PACKET_SIZE};
use ferry_transfer::server::{Server, ServerConfig};

struct TestServer {
    addr: SocketAddr,
    cancelled: Arc<AtomicBool>,
    done_rx: Receiver<Result<(), TransferError>>,
    send_dir: PathBuf,
    recv_dir: PathBuf,
    root: PathBuf,
}

impl TestServer {
    fn stop(self) {
        self.cancelled.store(true, Ordering::Relaxed);
        match self.done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(result) => result.expect("server failed"),
            Err(_) => panic!("server did not shut down"),
        }
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn fixture_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ferry_test_{tag}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn start_server(tag: &str, packet_size: usize) -> TestServer {
    let root = fixture_dir(tag);
    let send_dir = root.join("send");
    let recv_dir = root.join("recv");
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    let cancelled = Arc::new(AtomicBool::new(false));
    let config = ServerConfig {
        packet_size,
        send_dir: send_dir.clone(),
        recv_dir: recv_dir.clone(),
        pace: Duration::from_millis(1),
        phase_timeout: Duration::from_secs(2),
    };
    let mut server = Server::new(socket, config, cancelled.clone()).unwrap();
    let (done_tx, done_rx) = bounded(1);
    thread::spawn(move || {
        let _ = done_tx.send(server.run());
    });
    TestServer {
        addr,
        cancelled,
        done_rx,
        send_dir,
        recv_dir,
        root,
    }
}

fn client_config(server: SocketAddr, download_dir: PathBuf) -> ClientConfig {
    let mut config = ClientConfig::new(server);
    config.download_dir = download_dir;
    config.pace = Duration::from_millis(1);
    config.phase_timeout = Duration::from_secs(2);
    config
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect() // prime modulus for good distribution
}

fn upload_roundtrip(tag: &str, size: usize) {
    let srv = start_server(tag, DEFAULT_PACKET_SIZE);
    let data = patterned(size);
    let input = srv.root.join("input.bin");
    fs::write(&input, &data).unwrap();

    let mut session = ClientSession::connect(client_config(srv.addr, srv.root.join("down"))).unwrap();
    let sent = session.upload(&input).unwrap();
    assert_eq!(sent, size as u64);
    session.disconnect().unwrap();

    let stored = fs::read(srv.recv_dir.join("input.bin")).unwrap();
    assert_eq!(stored, data, "stored bytes differ");
    srv.stop();
}

#[test]
fn upload_roundtrip_empty_file() {
    upload_roundtrip("up_empty", 0);
}

#[test]
fn upload_roundtrip_one_under_chunk() {
    upload_roundtrip("up_under", chunk_capacity(DEFAULT_PACKET_SIZE) - 1);
}

#[test]
fn upload_roundtrip_exact_chunk() {
    upload_roundtrip("up_exact", chunk_capacity(DEFAULT_PACKET_SIZE));
}

#[test]
fn upload_roundtrip_one_over_chunk() {
    upload_roundtrip("up_over", chunk_capacity(DEFAULT_PACKET_SIZE) + 1);
}

#[test]
fn upload_roundtrip_ten_chunks() {
    upload_roundtrip("up_ten", 10 * chunk_capacity(DEFAULT_PACKET_SIZE));
}

#[test]
fn upload_10000_bytes_at_packet_4096() {
    let srv = start_server("up_10k", 4096);
    let data = patterned(10000);
    let input = srv.root.join("big.bin");
    fs::write(&input, &data).unwrap();

    let session = ClientSession::connect(client_config(srv.addr, srv.root.join("down"))).unwrap();
    let reports = session.run(vec![TransferJob::Upload(input)]).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(
        matches!(reports[0].outcome, TransferOutcome::Uploaded { bytes: 10000 }),
        "unexpected outcome: {:?}",
        reports[0].outcome
    );

    let stored = fs::read(srv.recv_dir.join("big.bin")).unwrap();
    assert_eq!(stored.len(), 10000);
    assert_eq!(stored, data);
    srv.stop();
}

#[test]
fn download_roundtrip() {
    let srv = start_server("down", DEFAULT_PACKET_SIZE);
    let data = patterned(10 * chunk_capacity(DEFAULT_PACKET_SIZE));
    fs::write(srv.send_dir.join("movie.bin"), &data).unwrap();
    let down = srv.root.join("down");

    let mut session = ClientSession::connect(client_config(srv.addr, down.clone())).unwrap();
    let outcome = session.download("movie.bin").unwrap();
    assert!(outcome.complete);
    assert_eq!(outcome.bytes_written, data.len() as u64);
    session.disconnect().unwrap();

    assert_eq!(fs::read(down.join("movie.bin")).unwrap(), data);
    srv.stop();
}

#[test]
fn download_missing_file_creates_nothing() {
    let srv = start_server("down_missing", DEFAULT_PACKET_SIZE);
    let down = srv.root.join("down");

    let mut session = ClientSession::connect(client_config(srv.addr, down.clone())).unwrap();
    match session.download("missing.txt") {
        Err(TransferError::NotFound(name)) => assert_eq!(name, "missing.txt"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    session.disconnect().unwrap();

    assert!(!down.exists(), "download dir should not have been created");
    srv.stop();
}

#[test]
fn size_negotiation_is_idempotent() {
    let srv = start_server("nego", DEFAULT_PACKET_SIZE);
    let data = patterned(3000);
    let input = srv.root.join("small.bin");
    fs::write(&input, &data).unwrap();

    let mut config = client_config(srv.addr, srv.root.join("down"));
    config.packet_size = 1024;
    // connect() negotiates once; a second explicit round must leave both
    // peers still agreeing on the same size.
    let mut session = ClientSession::connect(config).unwrap();
    session.negotiate().unwrap();

    session.upload(&input).unwrap();
    session.disconnect().unwrap();

    assert_eq!(fs::read(srv.recv_dir.join("small.bin")).unwrap(), data);
    srv.stop();
}

#[test]
fn chunk_spelling_the_terminator_is_still_data() {
    let srv = start_server("collide", DEFAULT_PACKET_SIZE);
    let data = b"Upload Done".to_vec();
    let input = srv.root.join("tricky.bin");
    fs::write(&input, &data).unwrap();

    let mut session = ClientSession::connect(client_config(srv.addr, srv.root.join("down"))).unwrap();
    session.upload(&input).unwrap();
    session.disconnect().unwrap();

    assert_eq!(fs::read(srv.recv_dir.join("tricky.bin")).unwrap(), data);
    srv.stop();
}

fn send_cmd(socket: &UdpSocket, dest: SocketAddr, cmd: &Command, packet_size: usize) {
    let frame = protocol::encode_control(&cmd.to_string(), packet_size).unwrap();
    socket.send_to(&frame, dest).unwrap();
}

fn recv_cmd(socket: &UdpSocket) -> Command {
    let mut buf = [0u8; 65507];
    let (len, _) = socket.recv_from(&mut buf).unwrap();
    match protocol::decode(&buf[..len]) {
        Some(Frame::Control(text)) => Command::parse(&text).unwrap(),
        other => panic!("expected a control frame, got {other:?}"),
    }
}

/// Drive the server with raw frames: declare more bytes than are sent, see
/// the `Corrupted` verdict, then resend in full and see `Done`.
#[test]
fn truncated_upload_gets_corrupted_verdict_then_resend_succeeds() {
    let srv = start_server("truncated", DEFAULT_PACKET_SIZE);
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let cap = chunk_capacity(DEFAULT_PACKET_SIZE);
    let data = patterned(9000);

    // Attempt 1: declare 9000 bytes but send only the first chunk.
    send_cmd(
        &socket,
        srv.addr,
        &Command::Upload {
            name: "short.bin".into(),
            size: 9000,
        },
        DEFAULT_PACKET_SIZE,
    );
    assert_eq!(recv_cmd(&socket), Command::Waiting);
    socket
        .send_to(&protocol::encode_chunk(&data[..cap]), srv.addr)
        .unwrap();
    send_cmd(&socket, srv.addr, &Command::UploadDone, DEFAULT_PACKET_SIZE);
    assert_eq!(recv_cmd(&socket), Command::Corrupted);
    // The partial file is kept.
    assert_eq!(fs::read(srv.recv_dir.join("short.bin")).unwrap().len(), cap);

    // Attempt 2: one full resend succeeds.
    send_cmd(
        &socket,
        srv.addr,
        &Command::Upload {
            name: "short.bin".into(),
            size: 9000,
        },
        DEFAULT_PACKET_SIZE,
    );
    assert_eq!(recv_cmd(&socket), Command::Waiting);
    for chunk in data.chunks(cap) {
        thread::sleep(Duration::from_millis(1));
        socket.send_to(&protocol::encode_chunk(chunk), srv.addr).unwrap();
    }
    send_cmd(&socket, srv.addr, &Command::UploadDone, DEFAULT_PACKET_SIZE);
    assert_eq!(recv_cmd(&socket), Command::Done);
    assert_eq!(fs::read(srv.recv_dir.join("short.bin")).unwrap(), data);

    send_cmd(&socket, srv.addr, &Command::Disconnect, DEFAULT_PACKET_SIZE);
    assert_eq!(recv_cmd(&socket), Command::Disconnected);
    srv.stop();
}

fn drain_stream(socket: &UdpSocket) -> (u64, SocketAddr) {
    let mut bytes = 0u64;
    let mut buf = [0u8; 65507];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).unwrap();
        match protocol::decode(&buf[..len]).unwrap() {
            Frame::Chunk(data) => bytes += data.len() as u64,
            Frame::Control(text) => match Command::parse(&text).unwrap() {
                Command::UploadDone => return (bytes, peer),
                other => panic!("unexpected '{other}' mid-stream"),
            },
        }
    }
}

/// A scripted peer answers the first full upload with `Corrupted` and the
/// resend with `Done`; the client must retry exactly once and succeed.
#[test]
fn upload_resends_once_per_corrupted_verdict() {
    let server_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    server_socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = server_socket.local_addr().unwrap();
    let root = fixture_dir("retry");
    let data = patterned(5000);
    let input = root.join("input.bin");
    fs::write(&input, &data).unwrap();

    let script = thread::spawn(move || {
        let mut buf = [0u8; 65507];
        for attempt in 0..2 {
            let (len, peer) = server_socket.recv_from(&mut buf).unwrap();
            let cmd = match protocol::decode(&buf[..len]).unwrap() {
                Frame::Control(text) => Command::parse(&text).unwrap(),
                other => panic!("expected Upload, got {other:?}"),
            };
            assert!(
                matches!(cmd, Command::Upload { ref name, size: 5000 } if name == "input.bin"),
                "attempt {attempt}: unexpected '{cmd}'"
            );
            send_cmd(&server_socket, peer, &Command::Waiting, DEFAULT_PACKET_SIZE);
            let (bytes, peer) = drain_stream(&server_socket);
            assert_eq!(bytes, 5000, "attempt {attempt}: stream incomplete");
            let verdict = if attempt == 0 {
                Command::Corrupted
            } else {
                Command::Done
            };
            send_cmd(&server_socket, peer, &verdict, DEFAULT_PACKET_SIZE);
        }
    });

    let mut session = ClientSession::connect(client_config(addr, root.join("down"))).unwrap();
    let sent = session.upload(&input).unwrap();
    assert_eq!(sent, 5000);
    script.join().unwrap();
    let _ = fs::remove_dir_all(&root);
}
