// rawmint-worker - single-use demosaic subprocess
// Connects to the host's socket, answers exactly one request, exits.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;
use std::path::PathBuf;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rawmint::ipc::{read_frame, write_frame, WorkerRequest, WorkerResponse};
use rawmint::raw::RawProcessor;

#[derive(Parser)]
#[command(name = "rawmint-worker", version, about = "Out-of-process LibRaw demosaic worker")]
struct Args {
    /// Host socket to connect to
    #[arg(long)]
    socket: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout/stderr are diagnostics only; the host forwards them to its log
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut stream = UnixStream::connect(&args.socket)
        .await
        .with_context(|| format!("Failed to connect to {}", args.socket.display()))?;

    let request: WorkerRequest = read_frame(&mut stream)
        .await
        .context("Failed to read request")?
        .context("Host closed the socket before sending a request")?;

    debug!("Received {} base64 bytes", request.data.len());

    let response = match demosaic(&request) {
        Ok(tiff) => {
            info!("Demosaic complete ({} bytes)", tiff.len());
            WorkerResponse::success(STANDARD.encode(tiff))
        }
        Err(e) => {
            warn!("Demosaic failed: {:#}", e);
            WorkerResponse::failure(format!("{:#}", e))
        }
    };

    write_frame(&mut stream, &response)
        .await
        .context("Failed to send response")?;

    Ok(())
}

fn demosaic(request: &WorkerRequest) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(request.data.as_bytes())
        .context("Request data is not valid base64")?;

    let image = RawProcessor::new().demosaic(&raw)?;
    Ok(image.to_tiff()?)
}
