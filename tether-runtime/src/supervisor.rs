//! Runtime process supervision
//!
//! A [`Supervisor`] owns a background task that keeps exactly one runtime
//! process running. It relaunches the child whenever it exits, throttled by
//! [`RestartThrottle`], and publishes liveness through an atomic flag that the
//! request gate reads without locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use tether_config::SupervisorConfig;

use crate::backoff::RestartThrottle;
use crate::error::RuntimeError;
use crate::process::{DiagnosticStream, LaunchSpec, ProcessIo, ProcessLauncher, RuntimeProcess};

/// Lifecycle notifications from the supervisor task.
///
/// Called from the supervisor task itself, so implementations must not block.
pub trait ProcessObserver: Send + Sync {
    /// A new runtime instance is running; `io` is its message channel if piped
    fn on_started(&self, pid: Option<u32>, io: Option<ProcessIo>);

    /// The current instance has exited
    fn on_exited(&self, code: Option<i32>);
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub launch: LaunchSpec,
    pub restart_backoff: Duration,
    pub terminate_grace: Duration,
}

impl SupervisorOptions {
    /// Build options from configuration; fails when no executable is set
    pub fn from_config(config: &SupervisorConfig) -> Result<Self, RuntimeError> {
        let program = config.executable.clone().ok_or_else(|| {
            RuntimeError::ConfigurationError("no runtime executable configured".to_string())
        })?;

        Ok(Self {
            launch: LaunchSpec::runtime(program, config.identity.clone(), config.stdio_transport),
            restart_backoff: config.restart_backoff,
            terminate_grace: config.terminate_grace,
        })
    }
}

/// Handle to the supervisor task
pub struct Supervisor {
    alive: Arc<AtomicBool>,
    launches: Arc<AtomicU64>,
    exit_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Start supervising on the current tokio runtime
    pub fn spawn(
        options: SupervisorOptions,
        launcher: Arc<dyn ProcessLauncher>,
        observer: Option<Arc<dyn ProcessObserver>>,
    ) -> Self {
        Self::spawn_with_flag(options, launcher, observer, Arc::new(AtomicBool::new(false)))
    }

    /// Start supervising, publishing liveness into an existing flag
    pub fn spawn_with_flag(
        options: SupervisorOptions,
        launcher: Arc<dyn ProcessLauncher>,
        observer: Option<Arc<dyn ProcessObserver>>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        alive.store(false, Ordering::Release);
        let launches = Arc::new(AtomicU64::new(0));
        let (exit_tx, exit_rx) = watch::channel(false);

        let run_loop = RunLoop {
            throttle: RestartThrottle::new(options.restart_backoff),
            options,
            launcher,
            observer,
            alive: alive.clone(),
            launches: launches.clone(),
            exit_rx,
        };

        Self {
            alive,
            launches,
            exit_tx,
            task: Some(tokio::spawn(run_loop.run())),
        }
    }

    /// Whether a runtime instance is currently running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Shared liveness flag, written only by the supervisor task
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    /// Number of successful launches so far
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Request exit, terminate the current child and wait for the task.
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.exit_tx.send_replace(true);

        if let Some(task) = self.task.take() {
            task.await?;
            debug!("supervisor task joined");
        }
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // The task observes this and tears the child down on its own
        self.exit_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("alive", &self.is_alive())
            .field("launches", &self.launch_count())
            .finish()
    }
}

struct RunLoop {
    options: SupervisorOptions,
    throttle: RestartThrottle,
    launcher: Arc<dyn ProcessLauncher>,
    observer: Option<Arc<dyn ProcessObserver>>,
    alive: Arc<AtomicBool>,
    launches: Arc<AtomicU64>,
    exit_rx: watch::Receiver<bool>,
}

impl RunLoop {
    async fn run(mut self) {
        info!(program = %self.options.launch.program.display(), "runtime supervisor started");

        while !self.exiting() {
            if let Some(delay) = self.throttle.delay_at(Instant::now()) {
                warn!(delay = ?delay, "runtime restarting too quickly, backing off");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = exit_requested(&mut self.exit_rx) => break,
                }
            }

            self.throttle.record_start(Instant::now());
            let process = match self.launcher.launch(&self.options.launch).await {
                Ok(process) => process,
                Err(e) => {
                    error!("failed to launch runtime: {}", e);
                    continue;
                }
            };

            if !self.supervise(process).await {
                break;
            }
        }

        self.alive.store(false, Ordering::Release);
        info!("runtime supervisor stopped");
    }

    /// Run one instance to completion. Returns false when exit was requested.
    async fn supervise(&mut self, mut process: Box<dyn RuntimeProcess>) -> bool {
        let pid = process.id();
        self.launches.fetch_add(1, Ordering::Relaxed);
        info!(pid = ?pid, "runtime started");

        // Connect before publishing liveness
        if let Some(observer) = &self.observer {
            observer.on_started(pid, process.take_io());
        }
        self.alive.store(true, Ordering::Release);

        let diagnostics = process.take_diagnostics();
        let outcome = tokio::select! {
            outcome = watch_process(process.as_mut(), diagnostics) => Some(outcome),
            _ = exit_requested(&mut self.exit_rx) => None,
        };

        match outcome {
            Some((code, last_line)) => {
                if code != Some(0) {
                    error!(
                        pid = ?pid,
                        code = ?code,
                        last_error = last_line.as_deref().unwrap_or(""),
                        "runtime exited abnormally"
                    );
                } else {
                    info!(pid = ?pid, "runtime exited");
                }
                self.alive.store(false, Ordering::Release);
                self.notify_exited(code);
                true
            }
            None => {
                info!(pid = ?pid, "stopping runtime");
                if let Err(e) = process.terminate(self.options.terminate_grace).await {
                    error!(pid = ?pid, "failed to terminate runtime: {}", e);
                }
                self.alive.store(false, Ordering::Release);
                self.notify_exited(None);
                false
            }
        }
    }

    fn exiting(&self) -> bool {
        *self.exit_rx.borrow()
    }

    fn notify_exited(&self, code: Option<i32>) {
        if let Some(observer) = &self.observer {
            observer.on_exited(code);
        }
    }
}

/// Drain the diagnostic stream, then wait for exit.
///
/// Yields the exit code and the last diagnostic line seen.
async fn watch_process(
    process: &mut dyn RuntimeProcess,
    diagnostics: Option<DiagnosticStream>,
) -> (Option<i32>, Option<String>) {
    let mut last_line = None;

    if let Some(mut stream) = diagnostics {
        let mut line = String::new();
        loop {
            line.clear();
            match stream.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end();
                    if text.is_empty() {
                        break;
                    }
                    error!(target: "tether_runtime::child", "{}", text);
                    last_line = Some(text.to_string());
                }
                Err(e) => {
                    warn!("diagnostic stream failed: {}", e);
                    break;
                }
            }
        }
    }

    match process.wait().await {
        Ok(code) => (code, last_line),
        Err(e) => {
            error!("failed to wait for runtime: {}", e);
            (None, last_line)
        }
    }
}

async fn exit_requested(exit_rx: &mut watch::Receiver<bool>) {
    // A dropped sender also means exit
    let _ = exit_rx.wait_for(|exit| *exit).await;
}
