//! In-process stand-in for the runtime
//!
//! [`StubRuntime`] is the runtime side of the message channel: it answers
//! calls with canned results. [`StubLauncher`] hands the supervisor
//! [`StubProcess`]es backed by a stub runtime over an in-memory duplex, with
//! a configurable uptime, so lifecycle and end-to-end behaviour can be
//! exercised without spawning real processes.

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, split, AsyncRead, AsyncWrite, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use tether_ipc::{
    ApiRequest, ApiResult, HostMessage, IpcError, LineReader, LineWriter, MessageEnvelope,
    RankEntry, RankResult, RewardEntry, RewardResult, RuntimeMessage, VersionInfo,
};

use crate::error::RuntimeError;
use crate::process::{DiagnosticStream, LaunchSpec, ProcessIo, ProcessLauncher, RuntimeProcess};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// How a stub runtime answers
#[derive(Debug, Clone)]
pub struct StubBehavior {
    /// Reported by version calls and the ready announcement
    pub version: String,
    /// Wait before each reply
    pub reply_delay: Duration,
    /// Read calls but never answer them
    pub silent: bool,
    /// Send `Ready` when the channel opens
    pub announce: bool,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            version: "stub-1.0.0".to_string(),
            reply_delay: Duration::ZERO,
            silent: false,
            announce: true,
        }
    }
}

impl StubBehavior {
    /// The canned answer for a request
    pub fn answer(&self, request: &ApiRequest) -> ApiResult {
        match request {
            ApiRequest::Version => ApiResult::Version(VersionInfo {
                version: self.version.clone(),
            }),
            ApiRequest::RankResult { handle } => ApiResult::RankResult(RankResult {
                handle: *handle,
                ranks: vec![
                    RankEntry {
                        account: "alice".to_string(),
                        score: 0.75,
                    },
                    RankEntry {
                        account: "bob".to_string(),
                        score: 0.25,
                    },
                ],
            }),
            ApiRequest::Reward { height, version } => ApiResult::Reward(RewardResult {
                height: *height,
                version: version.clone(),
                rewards: vec![RewardEntry {
                    account: "alice".to_string(),
                    amount: height * 10,
                }],
            }),
        }
    }
}

/// Runtime-side server loop
pub struct StubRuntime<R, W> {
    reader: LineReader<R>,
    writer: LineWriter<W>,
    behavior: StubBehavior,
    calls: Arc<AtomicUsize>,
}

impl<R, W> StubRuntime<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(reader: R, writer: W, behavior: StubBehavior) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer: LineWriter::new(writer),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count received calls into `calls`
    pub fn with_call_counter(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    /// Serve until the host shuts us down or closes the channel
    pub async fn run(mut self) -> Result<(), IpcError> {
        if self.behavior.announce {
            let ready = RuntimeMessage::Ready {
                version: self.behavior.version.clone(),
            };
            self.writer.send(&MessageEnvelope::new(ready)).await?;
        }

        loop {
            let envelope = match self.reader.receive::<HostMessage>().await {
                Ok(envelope) => envelope,
                Err(IpcError::ConnectionClosed) => break,
                Err(e) => return Err(e),
            };

            match envelope.message {
                HostMessage::Call { api_id, request } => {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    debug!(api_id, kind = %request.kind(), "stub runtime received call");
                    if self.behavior.silent {
                        continue;
                    }

                    if !self.behavior.reply_delay.is_zero() {
                        sleep(self.behavior.reply_delay).await;
                    }
                    let reply = RuntimeMessage::Reply {
                        api_id,
                        result: self.behavior.answer(&request),
                    };
                    self.writer.send(&MessageEnvelope::new(reply)).await?;
                }
                HostMessage::Shutdown => {
                    info!("stub runtime shutting down");
                    break;
                }
            }
        }

        self.writer.close().await
    }
}

/// [`ProcessLauncher`] producing [`StubProcess`]es
#[derive(Debug)]
pub struct StubLauncher {
    behavior: StubBehavior,
    uptime: Option<Duration>,
    scripted_uptimes: Vec<Option<Duration>>,
    exit_code: i32,
    failing: bool,
    diagnostics: Vec<String>,
    launches: Mutex<Vec<Instant>>,
    attempts: AtomicUsize,
    terminations: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    next_pid: AtomicU32,
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl StubLauncher {
    /// Children run until terminated and answer immediately
    pub fn new() -> Self {
        Self {
            behavior: StubBehavior::default(),
            uptime: None,
            scripted_uptimes: Vec::new(),
            exit_code: 1,
            failing: false,
            diagnostics: Vec::new(),
            launches: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            next_pid: AtomicU32::new(4000),
        }
    }

    /// Each child exits on its own after `uptime`
    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.uptime = Some(uptime);
        self
    }

    /// Uptimes for the first launches, in order; later launches use the default
    pub fn with_scripted_uptimes(mut self, uptimes: Vec<Option<Duration>>) -> Self {
        self.scripted_uptimes = uptimes;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_behavior(mut self, behavior: StubBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Lines each child writes to its diagnostic stream
    pub fn with_diagnostics(mut self, lines: &[&str]) -> Self {
        self.diagnostics = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    /// Every launch attempt fails
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// When each successful launch happened
    pub fn launch_times(&self) -> Vec<Instant> {
        self.launches.lock().clone()
    }

    /// Launch attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Calls received across all children
    pub fn calls_received(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn diagnostic_stream(&self) -> Option<DiagnosticStream> {
        if self.diagnostics.is_empty() {
            return None;
        }
        let mut text = self.diagnostics.join("\n");
        text.push('\n');
        Some(Box::new(BufReader::new(Cursor::new(text.into_bytes()))))
    }
}

#[async_trait]
impl ProcessLauncher for StubLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn RuntimeProcess>, RuntimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RuntimeError::LaunchError(format!(
                "{}: stub launch failure",
                spec.program.display()
            )));
        }
        let uptime = {
            let mut launches = self.launches.lock();
            let uptime = self
                .scripted_uptimes
                .get(launches.len())
                .copied()
                .unwrap_or(self.uptime);
            launches.push(Instant::now());
            uptime
        };

        let (io, server) = if spec.stdio {
            let (host, runtime) = duplex(DUPLEX_CAPACITY);
            let (host_read, host_write) = split(host);
            let (runtime_read, runtime_write) = split(runtime);

            let stub = StubRuntime::new(runtime_read, runtime_write, self.behavior.clone())
                .with_call_counter(self.calls.clone());
            let server = tokio::spawn(async move {
                if let Err(e) = stub.run().await {
                    debug!("stub runtime ended: {}", e);
                }
            });

            let io = ProcessIo {
                reader: Box::new(host_read),
                writer: Box::new(host_write),
            };
            (Some(io), Some(server))
        } else {
            (None, None)
        };

        Ok(Box::new(StubProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            io,
            diagnostics: self.diagnostic_stream(),
            uptime,
            exit_code: self.exit_code,
            server,
            terminations: self.terminations.clone(),
        }))
    }
}

/// A pretend child process
pub struct StubProcess {
    pid: u32,
    io: Option<ProcessIo>,
    diagnostics: Option<DiagnosticStream>,
    uptime: Option<Duration>,
    exit_code: i32,
    server: Option<JoinHandle<()>>,
    terminations: Arc<AtomicUsize>,
}

impl StubProcess {
    fn kill_server(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

#[async_trait]
impl RuntimeProcess for StubProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.diagnostics.take()
    }

    fn take_io(&mut self) -> Option<ProcessIo> {
        self.io.take()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        match self.uptime {
            Some(uptime) => {
                sleep(uptime).await;
                self.kill_server();
                Ok(Some(self.exit_code))
            }
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.kill_server();
        Ok(())
    }
}

impl Drop for StubProcess {
    fn drop(&mut self) {
        self.kill_server();
    }
}
