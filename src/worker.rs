//! Demosaic Worker Bridge
//!
//! Runs the LibRaw demosaic in a throwaway subprocess so a decoder crash on a
//! malformed camera file only costs one conversion, never the host.
//!
//! ## Lifecycle (per call)
//!
//! 1. **Spawn** - private socket directory, child started with `--socket`
//! 2. **Exchange** - exactly one request frame out, one response frame back
//! 3. **Teardown** - disconnect then kill, exactly once, on every path
//!
//! stdout/stderr of the child are diagnostics only and are forwarded to
//! `tracing`. Payload bytes never travel over stdio.
//!
//! The whole exchange is bounded by a deadline; a hung decoder is killed
//! and reported as a tier failure.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::ConverterConfig;
use crate::error::{ConversionError, Result};
use crate::ipc::{read_frame, write_frame, WorkerRequest, WorkerResponse};

/// How long to wait for a killed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// What came back from one exchange
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A response frame; `None` when the body was `null` or empty
    Message(Option<WorkerResponse>),
    /// The child exited before answering
    Exited(Option<i32>),
    /// Socket or spawn-level failure
    Transport(String),
}

/// One live worker. Single-use: `send` once, `recv` once, then teardown.
#[async_trait]
pub trait WorkerChannel: Send {
    async fn send(&mut self, request: &WorkerRequest) -> std::result::Result<(), WorkerEvent>;
    async fn recv(&mut self) -> WorkerEvent;
    async fn disconnect(&mut self);
    async fn kill(&mut self);
}

/// Starts a fresh worker per conversion
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn WorkerChannel>>;
}

// ============================================================================
// Bridge
// ============================================================================

pub struct DemosaicBridge {
    launcher: Arc<dyn WorkerLauncher>,
    timeout: Duration,
}

impl DemosaicBridge {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(
            Arc::new(ProcessLauncher::new(config.worker_path.clone())),
            config.worker_timeout,
        )
    }

    /// Send RAW bytes to a new worker and return its demosaiced TIFF bytes
    pub async fn demosaic(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let channel = self.launcher.launch().await?;
        let mut session = WorkerSession::new(channel);

        let request = WorkerRequest {
            data: STANDARD.encode(raw),
        };

        let outcome = tokio::time::timeout(self.timeout, session.exchange(&request)).await;
        session.settle().await;

        match outcome {
            Ok(event) => interpret(event),
            Err(_) => Err(ConversionError::Worker(format!(
                "demosaic worker timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

struct WorkerSession {
    channel: Box<dyn WorkerChannel>,
    settled: bool,
}

impl WorkerSession {
    fn new(channel: Box<dyn WorkerChannel>) -> Self {
        Self {
            channel,
            settled: false,
        }
    }

    async fn exchange(&mut self, request: &WorkerRequest) -> WorkerEvent {
        if let Err(event) = self.channel.send(request).await {
            return event;
        }
        self.channel.recv().await
    }

    /// Disconnect and kill. Later calls are no-ops.
    async fn settle(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.channel.disconnect().await;
        self.channel.kill().await;
    }
}

/// Response priority: empty payload, error string, missing data, decode
fn interpret(event: WorkerEvent) -> Result<Vec<u8>> {
    match event {
        WorkerEvent::Message(None) => Err(ConversionError::Worker(
            "demosaic worker returned an empty payload".to_string(),
        )),
        WorkerEvent::Message(Some(WorkerResponse {
            error: Some(error), ..
        })) if !error.is_empty() => Err(ConversionError::Worker(error)),
        WorkerEvent::Message(Some(WorkerResponse { data, .. })) => {
            let data = data.filter(|d| !d.is_empty()).ok_or_else(|| {
                ConversionError::Worker("demosaic worker response missing data field".to_string())
            })?;
            STANDARD.decode(data.as_bytes()).map_err(|e| {
                ConversionError::Worker(format!("demosaic worker sent invalid base64: {}", e))
            })
        }
        WorkerEvent::Exited(code) => Err(ConversionError::Worker(format!(
            "demosaic worker exited with code {}",
            code.map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ))),
        WorkerEvent::Transport(message) => Err(ConversionError::Worker(message)),
    }
}

// ============================================================================
// Subprocess transport
// ============================================================================

/// Spawns `program [args..] --socket <path>` for every conversion
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before `--socket`
    pub fn with_args<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Box<dyn WorkerChannel>> {
        let dir = tempfile::Builder::new().prefix("rawmint-").tempdir()?;
        let socket_path = dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--socket")
            .arg(&socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConversionError::Worker(format!(
                    "failed to spawn demosaic worker {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let pid = child.id();
        debug!(?pid, "Spawned demosaic worker");

        if let Some(stdout) = child.stdout.take() {
            forward_diagnostics(stdout, "stdout", pid);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_diagnostics(stderr, "stderr", pid);
        }

        Ok(Box::new(ProcessChannel {
            child,
            listener,
            stream: None,
            _dir: dir,
        }))
    }
}

fn forward_diagnostics<R>(reader: R, stream: &'static str, pid: Option<u32>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(?pid, stream, "worker: {}", line);
        }
    });
}

struct ProcessChannel {
    child: Child,
    listener: UnixListener,
    stream: Option<UnixStream>,
    // Removed (with the socket) when the channel drops
    _dir: TempDir,
}

fn exit_event(status: std::io::Result<ExitStatus>) -> WorkerEvent {
    match status {
        Ok(status) => WorkerEvent::Exited(status.code()),
        Err(e) => WorkerEvent::Transport(format!("failed to wait on demosaic worker: {}", e)),
    }
}

#[async_trait]
impl WorkerChannel for ProcessChannel {
    async fn send(&mut self, request: &WorkerRequest) -> std::result::Result<(), WorkerEvent> {
        let stream = tokio::select! {
            accepted = self.listener.accept() => match accepted {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    return Err(WorkerEvent::Transport(format!(
                        "demosaic worker connection failed: {}",
                        e
                    )))
                }
            },
            status = self.child.wait() => return Err(exit_event(status)),
        };

        let stream = self.stream.insert(stream);
        write_frame(stream, request).await.map_err(|e| {
            WorkerEvent::Transport(format!("failed to send request to demosaic worker: {}", e))
        })
    }

    async fn recv(&mut self) -> WorkerEvent {
        let Some(stream) = self.stream.as_mut() else {
            return WorkerEvent::Transport("demosaic worker is not connected".to_string());
        };

        match read_frame::<_, Option<WorkerResponse>>(stream).await {
            Ok(Some(message)) => WorkerEvent::Message(message),
            // Closed without answering: report how it exited
            Ok(None) => exit_event(self.child.wait().await),
            Err(e) => WorkerEvent::Transport(format!("demosaic worker transport error: {}", e)),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Worker socket shutdown: {}", e);
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Worker kill skipped: {}", e);
        }
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Demosaic worker reaped: {}", status),
            Ok(Err(e)) => warn!("Failed to reap demosaic worker: {}", e),
            Err(_) => warn!("Demosaic worker still running {:?} after kill", REAP_TIMEOUT),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
