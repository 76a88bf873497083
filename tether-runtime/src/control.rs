//! Control plane facade
//!
//! [`ControlPlane`] owns the callback table, request registry, connection
//! holder and request gate, and on [`ControlPlane::start`] spawns the sweep and
//! the runtime supervisor. Callers register one handler per API kind and then
//! issue calls through the `get_*` methods; every accepted call ends in exactly
//! one callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use tether_config::TetherConfig;
use tether_ipc::{
    ApiId, ApiRequest, ApiResult, CallbackTable, ConnectionHolder, HostMessage, RankResult,
    RewardResult, Status, VersionInfo,
};

use crate::error::RuntimeError;
use crate::gate::RequestGate;
use crate::link::RuntimeLink;
use crate::process::{ProcessLauncher, TokioLauncher};
use crate::registry::RequestRegistry;
use crate::supervisor::{ProcessObserver, Supervisor, SupervisorOptions};
use crate::sweep::Sweep;

struct Workers {
    sweep: Sweep,
    supervisor: Option<Supervisor>,
    link: Option<Arc<RuntimeLink>>,
}

/// Host-side entry point to the runtime
pub struct ControlPlane {
    config: TetherConfig,
    launcher: Arc<dyn ProcessLauncher>,
    callbacks: Arc<CallbackTable>,
    registry: Arc<RequestRegistry>,
    connection: Arc<ConnectionHolder>,
    gate: Arc<RequestGate>,
    next_api_id: AtomicU64,
    workers: Mutex<Option<Workers>>,
}

impl ControlPlane {
    /// Create a control plane that launches real processes
    pub fn new(config: TetherConfig) -> Result<Self, RuntimeError> {
        Self::with_launcher(config, Arc::new(TokioLauncher))
    }

    /// Create a control plane with a custom launcher
    pub fn with_launcher(
        config: TetherConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, RuntimeError> {
        config.validate_all()?;

        let callbacks = Arc::new(CallbackTable::new());
        let registry = Arc::new(RequestRegistry::new(callbacks.clone(), &config.registry));
        let connection = Arc::new(ConnectionHolder::new());
        let gate = Arc::new(RequestGate::new(
            registry.clone(),
            connection.clone(),
            callbacks.clone(),
        ));

        Ok(Self {
            config,
            launcher,
            callbacks,
            registry,
            connection,
            gate,
            next_api_id: AtomicU64::new(1),
            workers: Mutex::new(None),
        })
    }

    /// Start the sweep and the runtime supervisor.
    ///
    /// If the runtime cannot be started at all the control plane still counts
    /// as started: the failure is recorded and every call reports
    /// `Status::Exception` until the next start. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err(RuntimeError::AlreadyStarted);
        }

        let options = SupervisorOptions::from_config(&self.config.supervisor)
            .and_then(|options| self.launcher.check(&options.launch).map(|_| options));

        let sweep = Sweep::spawn(
            self.registry.clone(),
            self.callbacks.clone(),
            self.config.registry.tick_interval,
        );

        let options = match options {
            Ok(options) => options,
            Err(e) => {
                error!("runtime startup failed: {}", e);
                self.gate.open_with_exception(sweep.scheduler());
                *workers = Some(Workers {
                    sweep,
                    supervisor: None,
                    link: None,
                });
                return Err(e);
            }
        };

        self.gate.open(sweep.scheduler());
        let link = Arc::new(RuntimeLink::new(
            self.connection.clone(),
            self.registry.clone(),
        ));
        let observer: Arc<dyn ProcessObserver> = link.clone();
        let supervisor = Supervisor::spawn_with_flag(
            options,
            self.launcher.clone(),
            Some(observer),
            self.gate.alive_flag(),
        );

        *workers = Some(Workers {
            sweep,
            supervisor: Some(supervisor),
            link: Some(link),
        });
        info!("control plane started");
        Ok(())
    }

    /// Stop the supervisor and the sweep, then drop the connection, pending
    /// requests and handlers. Calls made afterwards fail synchronously.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let Some(mut workers) = self.workers.lock().take() else {
            return Ok(());
        };
        self.gate.close();

        // Best effort; the supervisor terminates the child regardless
        let _ = self
            .connection
            .with_connection(|conn| conn.send(HostMessage::Shutdown));

        // Teardown always completes; the first task failure is reported after
        let mut outcome = Ok(());
        if let Some(supervisor) = workers.supervisor.as_mut() {
            if let Err(e) = supervisor.stop().await {
                error!("supervisor task failed: {}", e);
                outcome = Err(e);
            }
        }
        if let Err(e) = workers.sweep.stop().await {
            error!("sweep task failed: {}", e);
            outcome = outcome.and(Err(e));
        }
        if let Some(link) = &workers.link {
            link.disconnect();
        }

        self.connection.clear();
        let dropped = self.registry.clear();
        if dropped > 0 {
            warn!(dropped, "dropped pending requests on shutdown");
        }
        self.callbacks.clear();

        info!("control plane stopped");
        outcome
    }

    pub fn is_started(&self) -> bool {
        self.gate.is_started()
    }

    /// Whether the runtime process is currently running
    pub fn is_alive(&self) -> bool {
        self.gate.is_alive()
    }

    /// Whether startup failed and calls report `Status::Exception`
    pub fn has_exception(&self) -> bool {
        self.gate.has_exception()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_pending(&self, api_id: ApiId) -> bool {
        self.registry.is_alive(api_id)
    }

    /// Fresh id for callers without one of their own
    pub fn next_api_id(&self) -> ApiId {
        self.next_api_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Cancel a pending call; no callback fires for it
    pub fn cancel(&self, api_id: ApiId) -> bool {
        self.registry.remove(api_id).is_some()
    }

    /// Reply path for transports other than the built-in link
    pub fn on_reply(&self, api_id: ApiId, result: ApiResult) -> bool {
        self.registry.resolve(api_id, result)
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn on_version<F>(&self, handler: F)
    where
        F: Fn(ApiId, Status, VersionInfo) + Send + Sync + 'static,
    {
        self.callbacks.register(handler);
    }

    pub fn on_rank_result<F>(&self, handler: F)
    where
        F: Fn(ApiId, Status, RankResult) + Send + Sync + 'static,
    {
        self.callbacks.register(handler);
    }

    pub fn on_reward<F>(&self, handler: F)
    where
        F: Fn(ApiId, Status, RewardResult) + Send + Sync + 'static,
    {
        self.callbacks.register(handler);
    }

    /// Ask the runtime for its version
    pub fn get_version(&self, api_id: ApiId) -> Status {
        self.gate.submit(api_id, ApiRequest::Version)
    }

    /// Fetch a ranking computed earlier under `handle`
    pub fn get_rank_result(&self, api_id: ApiId, handle: u64) -> Status {
        self.gate.submit(api_id, ApiRequest::RankResult { handle })
    }

    /// Fetch the rewards for a block height under a given algorithm version
    pub fn get_reward(&self, api_id: ApiId, height: u64, version: impl Into<String>) -> Status {
        self.gate.submit(
            api_id,
            ApiRequest::Reward {
                height,
                version: version.into(),
            },
        )
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("gate", &self.gate)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubLauncher;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::sleep;

    fn stub_config() -> TetherConfig {
        let mut config = TetherConfig::default();
        config.supervisor.executable = Some(PathBuf::from("stub-runtime"));
        config
    }

    fn recorder(plane: &ControlPlane) -> Arc<Mutex<Vec<(ApiId, Status, VersionInfo)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        plane.on_version(move |api_id, status, info| sink.lock().push((api_id, status, info)));
        seen
    }

    #[tokio::test]
    async fn test_calls_fail_before_start() {
        let plane = ControlPlane::with_launcher(stub_config(), Arc::new(StubLauncher::new())).unwrap();
        let seen = recorder(&plane);

        assert!(!plane.is_started());
        assert_eq!(plane.get_version(1), Status::Fail);
        assert_eq!(plane.pending_count(), 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_executable_records_exception() {
        let plane =
            ControlPlane::with_launcher(TetherConfig::default(), Arc::new(StubLauncher::new()))
                .unwrap();
        let seen = recorder(&plane);

        assert!(plane.start().is_err());
        assert!(plane.is_started());
        assert!(plane.has_exception());

        assert_eq!(plane.get_version(2), Status::Success);
        assert_eq!(plane.pending_count(), 0);

        sleep(Duration::from_millis(10)).await;
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, Status::Exception);
        assert_eq!(seen[0].2, VersionInfo::default());

        plane.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let plane = ControlPlane::with_launcher(stub_config(), Arc::new(StubLauncher::new())).unwrap();
        plane.start().unwrap();
        assert!(matches!(plane.start(), Err(RuntimeError::AlreadyStarted)));
        plane.stop().await.unwrap();
        assert!(!plane.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_round_trip_through_stub() {
        let launcher = Arc::new(StubLauncher::new());
        let plane = ControlPlane::with_launcher(stub_config(), launcher.clone()).unwrap();
        let seen = recorder(&plane);
        plane.start().unwrap();

        for _ in 0..100 {
            if plane.is_alive() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(plane.is_alive());

        let api_id = plane.next_api_id();
        assert_eq!(plane.get_version(api_id), Status::Success);

        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, api_id);
        assert_eq!(seen[0].1, Status::Success);
        assert_eq!(seen[0].2.version, "stub-1.0.0");
        assert_eq!(plane.pending_count(), 0);
        assert_eq!(launcher.calls_received(), 1);

        plane.stop().await.unwrap();
        assert_eq!(plane.get_version(plane.next_api_id()), Status::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_callback() {
        let launcher = Arc::new(StubLauncher::new().with_behavior(crate::stub::StubBehavior {
            silent: true,
            ..Default::default()
        }));
        let plane = ControlPlane::with_launcher(stub_config(), launcher).unwrap();
        let seen = recorder(&plane);
        plane.start().unwrap();

        while !plane.is_alive() {
            sleep(Duration::from_millis(10)).await;
        }
        plane.get_version(9);
        assert!(plane.is_pending(9));
        assert!(plane.cancel(9));

        sleep(Duration::from_secs(40)).await;
        assert!(seen.lock().is_empty());

        plane.stop().await.unwrap();
    }

    /// Runs one stub instance, then panics on the relaunch
    struct PanicsOnRelaunch {
        inner: StubLauncher,
        launched: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProcessLauncher for PanicsOnRelaunch {
        async fn launch(
            &self,
            spec: &crate::process::LaunchSpec,
        ) -> Result<Box<dyn crate::process::RuntimeProcess>, RuntimeError> {
            if self.launched.swap(true, Ordering::SeqCst) {
                panic!("launcher failed on relaunch");
            }
            self.inner.launch(spec).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_finishes_teardown_after_supervisor_failure() {
        let launcher = Arc::new(PanicsOnRelaunch {
            inner: StubLauncher::new()
                .with_uptime(Duration::from_secs(2))
                .with_behavior(crate::stub::StubBehavior {
                    silent: true,
                    ..Default::default()
                }),
            launched: std::sync::atomic::AtomicBool::new(false),
        });
        let plane = ControlPlane::with_launcher(stub_config(), launcher).unwrap();
        let seen = recorder(&plane);
        plane.start().unwrap();

        while !plane.is_alive() {
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(plane.get_version(1), Status::Success);

        // Instance exits at 2s, the relaunch at 9s panics the supervisor task
        sleep(Duration::from_secs(12)).await;
        assert!(plane.is_pending(1));

        assert!(matches!(plane.stop().await, Err(RuntimeError::JoinError(_))));
        assert!(!plane.is_started());
        assert_eq!(plane.pending_count(), 0);
        assert!(!plane.connection.is_connected());

        sleep(Duration::from_secs(40)).await;
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = stub_config();
        config.registry.retry_every = 0;
        assert!(ControlPlane::with_launcher(config, Arc::new(StubLauncher::new())).is_err());
    }
}
