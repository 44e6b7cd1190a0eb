// rawmint - conversion daemon
// Serves the RAW conversion organ over a Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rawmint::config::{ConverterConfig, WORKER_PATH_ENV, WORKER_TIMEOUT_ENV};
use rawmint::ipc::{read_frame, write_frame};
use rawmint::organ::{Organ, RawOrgan, Response, Stimulus};

#[derive(Parser)]
#[command(name = "rawmint", version, about = "RAW to JPEG conversion daemon")]
struct Args {
    /// Unix socket path for UDS server
    #[arg(long, env = "RAWMINT_SOCKET", default_value = "/tmp/rawmint.sock")]
    socket_path: String,

    /// Demosaic worker executable (defaults to rawmint-worker next to this binary)
    #[arg(long, env = WORKER_PATH_ENV)]
    worker_path: Option<PathBuf>,

    /// Deadline for one demosaic worker exchange, in milliseconds
    #[arg(long, env = WORKER_TIMEOUT_ENV)]
    worker_timeout_ms: Option<u64>,

    /// Edge cap for the last-resort tier in preview mode
    #[arg(long, env = "RAWMINT_MAX_PREVIEW_EDGE")]
    max_preview_edge: Option<u32>,

    /// Emit logs as JSON lines
    #[arg(long, env = "RAWMINT_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

impl Args {
    fn converter_config(&self) -> Result<ConverterConfig> {
        let mut config = ConverterConfig::default();
        if let Some(path) = &self.worker_path {
            config.worker_path = path.clone();
        }
        if let Some(ms) = self.worker_timeout_ms {
            config.worker_timeout = Duration::from_millis(ms);
        }
        if let Some(edge) = self.max_preview_edge {
            config.max_preview_edge = edge;
        }
        config.validate().context("Invalid converter configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting rawmint daemon");
    info!("   Socket: {}", args.socket_path);

    // Track startup time for health checks
    let start_time = Instant::now();

    let config = args.converter_config()?;
    info!(
        "   Worker: {} (timeout {}ms)",
        config.worker_path.display(),
        config.worker_timeout.as_millis()
    );

    let organ = Arc::new(RawOrgan::new(&config).context("Failed to initialize organ")?);

    let card = organ.describe();
    info!("   {} v{}: {} functions", card.name, card.version, card.functions.len());

    // Remove old socket if exists
    let socket_path = PathBuf::from(&args.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("Failed to remove old socket")?;
    }

    let listener = UnixListener::bind(&socket_path).context("Failed to bind Unix socket")?;

    info!("   Listening on {}", args.socket_path);

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let organ = Arc::clone(&organ);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, organ, start_time).await {
                        error!("Connection error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single UDS connection
async fn handle_connection(
    mut stream: UnixStream,
    organ: Arc<RawOrgan>,
    start_time: Instant,
) -> Result<()> {
    loop {
        let stimulus: Stimulus = match read_frame(&mut stream)
            .await
            .context("Failed to read stimulus")?
        {
            Some(stimulus) => stimulus,
            None => {
                debug!("Client disconnected");
                return Ok(());
            }
        };

        debug!("Received: op={}", stimulus.op);

        // Health check needs no organ processing
        let response = if stimulus.op == "health" || stimulus.op == "health.check" {
            Response {
                ok: true,
                output: serde_json::json!({
                    "status": "healthy",
                    "organ": "rawmint",
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": start_time.elapsed().as_millis() as u64,
                }),
                latency_ms: 0,
                cost: None,
            }
        } else {
            match organ.stimulate(stimulus).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Stimulate error: {:?}", e);
                    Response {
                        ok: false,
                        output: serde_json::json!({
                            "error": "InternalError",
                            "message": e.to_string(),
                        }),
                        latency_ms: 0,
                        cost: None,
                    }
                }
            }
        };

        write_frame(&mut stream, &response)
            .await
            .context("Failed to send response")?;

        debug!("Sent: ok={}, latency={}ms", response.ok, response.latency_ms);
    }
}
