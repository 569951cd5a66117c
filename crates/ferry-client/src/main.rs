use std::net::ToSocketAddrs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};

use ferry_transfer::client::{ClientConfig, ClientSession, TransferJob, TransferOutcome};
use ferry_transfer::protocol::DEFAULT_PACKET_SIZE;

#[derive(Parser)]
#[command(name = "ferry-client", about = "UDP file transfer client", version)]
#[command(group(ArgGroup::new("job").required(true).args(["upload", "download"])))]
struct Cli {
    /// Server address (IP or host name)
    #[arg(short = 'i', long, default_value = "127.0.0.1")]
    addr: String,

    /// Server port
    #[arg(short, long, default_value_t = 7776)]
    port: u16,

    /// Datagram size in bytes; negotiated with the server when it differs
    /// from the default
    #[arg(short, long, default_value_t = DEFAULT_PACKET_SIZE)]
    size: usize,

    /// Upload the given files to the server
    #[arg(short, long, num_args = 1.., value_name = "FILE")]
    upload: Vec<PathBuf>,

    /// Download the given files from the server
    #[arg(short, long, num_args = 1.., value_name = "NAME")]
    download: Vec<String>,

    /// Directory downloaded files are written into
    #[arg(long, default_value = "downloads", value_name = "DIR")]
    download_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=info,ferry_transfer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let server = (cli.addr.as_str(), cli.port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {}:{}", cli.addr, cli.port))?
        .next()
        .ok_or_else(|| anyhow!("{} did not resolve to any address", cli.addr))?;

    let mut config = ClientConfig::new(server);
    config.packet_size = cli.size;
    config.download_dir = cli.download_dir;

    let jobs: Vec<TransferJob> = if cli.upload.is_empty() {
        cli.download.into_iter().map(TransferJob::Download).collect()
    } else {
        cli.upload.into_iter().map(TransferJob::Upload).collect()
    };

    info!("connecting to {server} (packet size {})", config.packet_size);
    let session = ClientSession::connect(config)?;
    let reports = session.run(jobs)?;

    let mut failures = 0usize;
    for report in &reports {
        match &report.outcome {
            TransferOutcome::Uploaded { bytes } => {
                info!("uploaded '{}' ({bytes} bytes)", report.name)
            }
            TransferOutcome::Downloaded { bytes } => {
                info!("downloaded '{}' ({bytes} bytes)", report.name)
            }
            TransferOutcome::Rejected => warn!("'{}' is not on the server", report.name),
            TransferOutcome::Corrupted { bytes } => {
                warn!("'{}' arrived corrupted ({bytes} bytes)", report.name);
                failures += 1;
            }
            TransferOutcome::Failed(e) => {
                warn!("'{}' failed: {e}", report.name);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} transfers failed", reports.len());
    }
    Ok(())
}
