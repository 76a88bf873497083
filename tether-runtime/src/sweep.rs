//! Periodic sweep
//!
//! One task drives [`RequestRegistry::tick`] on a fixed interval and also
//! delivers callbacks the request gate deferred. Both happen on the same task,
//! so ticks never overlap and deferred fires never race a tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tether_ipc::{ApiId, ApiKind, CallbackTable, Status};

use crate::error::RuntimeError;
use crate::registry::RequestRegistry;

/// A callback to fire on the sweep task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredFire {
    pub kind: ApiKind,
    pub api_id: ApiId,
    pub status: Status,
}

/// Queues callbacks for the sweep task
#[derive(Debug, Clone)]
pub struct FireScheduler {
    sender: mpsc::UnboundedSender<DeferredFire>,
}

impl FireScheduler {
    pub fn new(sender: mpsc::UnboundedSender<DeferredFire>) -> Self {
        Self { sender }
    }

    /// Queue a fire. Hands it back if the sweep is gone.
    pub fn schedule(&self, fire: DeferredFire) -> Result<(), DeferredFire> {
        self.sender.send(fire).map_err(|e| e.0)
    }
}

/// Handle to the sweep task
pub struct Sweep {
    scheduler: FireScheduler,
    ticks: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Sweep {
    /// Start sweeping every `period`; the first tick lands one period from now
    pub fn spawn(
        registry: Arc<RequestRegistry>,
        callbacks: Arc<CallbackTable>,
        period: Duration,
    ) -> Self {
        let (sender, deferred_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_sweep(
            registry,
            callbacks,
            period,
            deferred_rx,
            shutdown_rx,
            ticks.clone(),
        ));

        Self {
            scheduler: FireScheduler::new(sender),
            ticks,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn scheduler(&self) -> FireScheduler {
        self.scheduler.clone()
    }

    /// Ticks completed so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop the task and wait for it. Queued fires are delivered first.
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for Sweep {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Sweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweep")
            .field("ticks", &self.tick_count())
            .finish()
    }
}

async fn run_sweep(
    registry: Arc<RequestRegistry>,
    callbacks: Arc<CallbackTable>,
    period: Duration,
    mut deferred_rx: mpsc::UnboundedReceiver<DeferredFire>,
    mut shutdown_rx: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period = ?period, "request sweep started");

    loop {
        tokio::select! {
            biased;

            Some(fire) = deferred_rx.recv() => {
                debug!(api_id = fire.api_id, status = %fire.status, "delivering deferred callback");
                callbacks.fire(fire.kind, fire.api_id, fire.status);
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {
                let report = registry.tick();
                let count = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                if !report.is_empty() {
                    debug!(
                        tick = count,
                        retried = report.retried.len(),
                        timed_out = report.timed_out.len(),
                        "sweep"
                    );
                }
            }
        }
    }

    // Deliver what was queued before shutdown
    deferred_rx.close();
    while let Ok(fire) = deferred_rx.try_recv() {
        callbacks.fire(fire.kind, fire.api_id, fire.status);
    }

    let pending = registry.len();
    if pending > 0 {
        warn!(pending, "request sweep stopped with requests still pending");
    }
    info!("request sweep stopped");
}
