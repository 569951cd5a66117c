use std::net::{ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use ferry_transfer::server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "ferry-server", about = "UDP file transfer server", version)]
struct Cli {
    /// Address to bind; falls back to FERRY_ADDR
    #[arg(short = 'i', long)]
    addr: Option<String>,

    /// Port to bind; falls back to FERRY_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Default datagram size in bytes; falls back to FERRY_SIZE
    #[arg(short, long)]
    size: Option<usize>,

    /// Directory served to download requests; falls back to FERRY_SEND_DIR
    #[arg(long, value_name = "DIR")]
    send_dir: Option<PathBuf>,

    /// Directory uploads are written into; falls back to FERRY_RECV_DIR
    #[arg(long, value_name = "DIR")]
    recv_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=info,ferry_transfer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // CLI flags override FERRY_* environment variables, which override the
    // built-in defaults.
    let addr = cli
        .addr
        .unwrap_or_else(|| std::env::var("FERRY_ADDR").unwrap_or_else(|_| "0.0.0.0".into()));
    let port: u16 = match cli.port {
        Some(port) => port,
        None => std::env::var("FERRY_PORT")
            .unwrap_or_else(|_| "7776".into())
            .parse()
            .context("parsing FERRY_PORT")?,
    };
    let mut config = ServerConfig::default();
    if let Some(size) = cli.size {
        config.packet_size = size;
    } else if let Ok(size) = std::env::var("FERRY_SIZE") {
        config.packet_size = size.parse().context("parsing FERRY_SIZE")?;
    }
    config.send_dir = cli
        .send_dir
        .unwrap_or_else(|| std::env::var("FERRY_SEND_DIR").unwrap_or_else(|_| "ferry-send".into()).into());
    config.recv_dir = cli
        .recv_dir
        .unwrap_or_else(|| std::env::var("FERRY_RECV_DIR").unwrap_or_else(|_| "ferry-recv".into()).into());

    let bind_addr = (addr.as_str(), port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {addr}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("{addr} did not resolve to any address"))?;

    // Bind through socket2 so the receive buffer can absorb a burst of
    // chunks faster than the loop drains them.
    let socket: UdpSocket = {
        let domain = if bind_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_recv_buffer_size(4 * 1024 * 1024)?;
        sock.bind(&bind_addr.into())
            .with_context(|| format!("binding {bind_addr}"))?;
        sock.into()
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("installing ctrl-c handler")?;

    info!(
        "serving {} for downloads, storing uploads in {}",
        config.send_dir.display(),
        config.recv_dir.display()
    );
    let mut server = Server::new(socket, config, cancelled)?;
    server.run()?;
    Ok(())
}
