//! Process launch boundary
//!
//! The supervisor never touches `tokio::process` directly. It asks a
//! [`ProcessLauncher`] for a [`RuntimeProcess`], which tests replace with an
//! in-memory stand-in.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tether_ipc::{BoxedReader, BoxedWriter};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::RuntimeError;

/// Line-oriented diagnostic output of a child (its stderr)
pub type DiagnosticStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// What to start and how to wire it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Pipe stdin/stdout for the message channel
    pub stdio: bool,
}

impl LaunchSpec {
    /// Runtime launch: the shared identity is the sole argument
    pub fn runtime(program: impl Into<PathBuf>, identity: impl Into<String>, stdio: bool) -> Self {
        Self {
            program: program.into(),
            args: vec![identity.into()],
            stdio,
        }
    }
}

/// Message channel to a running child
pub struct ProcessIo {
    /// Child's stdout
    pub reader: BoxedReader,
    /// Child's stdin
    pub writer: BoxedWriter,
}

impl std::fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessIo").finish_non_exhaustive()
    }
}

/// Handle to one running instance of the runtime
#[async_trait]
pub trait RuntimeProcess: Send {
    /// OS process id, if the child has one
    fn id(&self) -> Option<u32>;

    /// Take the diagnostic stream; `None` once taken
    fn take_diagnostics(&mut self) -> Option<DiagnosticStream>;

    /// Take the message channel; `None` once taken or when not piped
    fn take_io(&mut self) -> Option<ProcessIo>;

    /// Wait for exit, yielding the exit code (`None` when killed by a signal)
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the child to stop, forcing it after `grace`
    async fn terminate(&mut self, grace: Duration) -> io::Result<()>;
}

/// Starts runtime processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Reject a spec that can never launch, before supervision starts
    fn check(&self, _spec: &LaunchSpec) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn RuntimeProcess>, RuntimeError>;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    fn check(&self, spec: &LaunchSpec) -> Result<(), RuntimeError> {
        match resolve_program(&spec.program) {
            Some(path) => {
                debug!(program = %path.display(), "resolved runtime executable");
                Ok(())
            }
            None => Err(RuntimeError::LaunchError(format!(
                "runtime executable not found: {}",
                spec.program.display()
            ))),
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn RuntimeProcess>, RuntimeError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if spec.stdio {
            command.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            command.stdin(Stdio::null()).stdout(Stdio::null());
        }

        let child = command.spawn().map_err(|e| {
            RuntimeError::LaunchError(format!("{}: {}", spec.program.display(), e))
        })?;

        debug!(pid = ?child.id(), program = %spec.program.display(), "spawned runtime process");
        Ok(Box::new(TokioProcess { child }))
    }
}

/// Locate `program` the way `Command` will: a bare name is searched on
/// `PATH`, anything with a directory part is taken as given.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// A child spawned by [`TokioLauncher`]
#[derive(Debug)]
pub struct TokioProcess {
    child: Child,
}

#[async_trait]
impl RuntimeProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(BufReader::new(stderr)) as DiagnosticStream)
    }

    fn take_io(&mut self) -> Option<ProcessIo> {
        let writer = self.child.stdin.take()?;
        let reader = self.child.stdout.take()?;
        Some(ProcessIo {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<()> {
        // Already exited
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(id) = self.child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Err(e) = signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
                warn!(pid = id, "failed to send SIGTERM: {}", e);
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => {
                warn!(grace = ?grace, "runtime did not exit after SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    error!("failed to kill runtime process: {}", e);
                    return Err(e);
                }
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[test]
    fn test_runtime_spec_passes_identity_as_sole_argument() {
        let spec = LaunchSpec::runtime("/usr/bin/runtime", "shm-segment", true);
        assert_eq!(spec.args, vec!["shm-segment".to_string()]);
        assert!(spec.stdio);
    }

    #[tokio::test]
    async fn test_launch_missing_executable_fails() {
        let spec = LaunchSpec::runtime("/nonexistent/tether-runtime", "id", false);
        assert!(TokioLauncher.check(&spec).is_err());
        assert!(TokioLauncher.check(&LaunchSpec::runtime("/bin/sh", "id", false)).is_ok());

        let result = TokioLauncher.launch(&spec).await;
        assert!(matches!(result, Err(RuntimeError::LaunchError(_))));
    }

    #[test]
    fn test_check_searches_path_for_bare_names() {
        assert!(TokioLauncher.check(&LaunchSpec::runtime("sh", "id", false)).is_ok());
        assert!(TokioLauncher
            .check(&LaunchSpec::runtime("tether-no-such-runtime", "id", false))
            .is_err());

        // A relative path with a directory part is not looked up on PATH
        assert!(TokioLauncher.check(&LaunchSpec::runtime("./sh", "id", false)).is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_and_exit_code() {
        let spec = LaunchSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
            stdio: false,
        };
        let mut process = TokioLauncher.launch(&spec).await.unwrap();
        assert!(process.take_io().is_none());

        let mut diagnostics = process.take_diagnostics().unwrap();
        let mut line = String::new();
        diagnostics.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "boom");
        assert!(process.take_diagnostics().is_none());

        assert_eq!(process.wait().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_terminate_stops_long_running_child() {
        let spec = LaunchSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "sleep 30".into()],
            stdio: false,
        };
        let mut process = TokioLauncher.launch(&spec).await.unwrap();
        process.terminate(Duration::from_secs(2)).await.unwrap();

        // SIGTERM leaves no exit code
        assert_eq!(process.wait().await.unwrap(), None);
    }
}
