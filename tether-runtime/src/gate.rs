//! Request gate
//!
//! Every outward call passes through [`RequestGate::submit`], which decides
//! whether the control plane can serve it at all:
//!
//! 1. not started: `Fail`, returned synchronously
//! 2. sticky startup exception: `Exception`, fired later on the sweep task
//! 3. runtime not alive: `NotReady`, fired later on the sweep task
//! 4. otherwise the request is registered and sent
//!
//! Only case 4 creates a pending request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use tether_ipc::{ApiId, ApiKind, ApiRequest, CallbackTable, ConnectionHolder, HostMessage, Status};

use crate::registry::{RequestRegistry, RetryAction};
use crate::sweep::{DeferredFire, FireScheduler};

pub struct RequestGate {
    started: AtomicBool,
    exception: AtomicBool,
    alive: Arc<AtomicBool>,
    registry: Arc<RequestRegistry>,
    connection: Arc<ConnectionHolder>,
    callbacks: Arc<CallbackTable>,
    scheduler: Mutex<Option<FireScheduler>>,
}

impl RequestGate {
    pub fn new(
        registry: Arc<RequestRegistry>,
        connection: Arc<ConnectionHolder>,
        callbacks: Arc<CallbackTable>,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            exception: AtomicBool::new(false),
            alive: Arc::new(AtomicBool::new(false)),
            registry,
            connection,
            callbacks,
            scheduler: Mutex::new(None),
        }
    }

    /// Liveness flag to hand to the supervisor
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn has_exception(&self) -> bool {
        self.exception.load(Ordering::Acquire)
    }

    /// Open the gate, deferring failure callbacks through `scheduler`
    pub fn open(&self, scheduler: FireScheduler) {
        self.open_with(scheduler, false);
    }

    /// Open the gate for a runtime that could not be started. Every call
    /// reports `Status::Exception` until the gate is reopened.
    pub fn open_with_exception(&self, scheduler: FireScheduler) {
        self.open_with(scheduler, true);
    }

    fn open_with(&self, scheduler: FireScheduler, exception: bool) {
        *self.scheduler.lock() = Some(scheduler);
        // Set before `started` so no call sees the gate open without it
        self.exception.store(exception, Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    /// Close the gate; later calls fail synchronously
    pub fn close(&self) {
        self.started.store(false, Ordering::Release);
        self.scheduler.lock().take();
    }

    /// Route one call. `Status::Success` means accepted: the outcome arrives
    /// through the kind's callback. `Status::Fail` is final and fires nothing.
    pub fn submit(&self, api_id: ApiId, request: ApiRequest) -> Status {
        let kind = request.kind();

        if !self.is_started() {
            debug!(api_id, %kind, "control plane not started");
            return Status::Fail;
        }

        if self.has_exception() {
            self.defer(kind, api_id, Status::Exception);
            return Status::Success;
        }

        if !self.is_alive() {
            self.defer(kind, api_id, Status::NotReady);
            return Status::Success;
        }

        let send = self.send_action(api_id, request);
        if let Err(e) = self.registry.register(api_id, kind, Some(send.clone())) {
            warn!(api_id, %kind, "rejecting call: {}", e);
            return Status::Fail;
        }

        send();
        Status::Success
    }

    fn send_action(&self, api_id: ApiId, request: ApiRequest) -> RetryAction {
        let connection = self.connection.clone();
        Arc::new(move || {
            let message = HostMessage::Call {
                api_id,
                request: request.clone(),
            };
            match connection.with_connection(|conn| conn.send(message)) {
                Some(Ok(())) => trace!(api_id, "request sent"),
                Some(Err(e)) => warn!(api_id, "failed to send request: {}", e),
                None => debug!(api_id, "no runtime connection, request stays pending"),
            }
        })
    }

    fn defer(&self, kind: ApiKind, api_id: ApiId, status: Status) {
        let fire = DeferredFire {
            kind,
            api_id,
            status,
        };
        let scheduler = self.scheduler.lock().clone();

        let undelivered = match scheduler {
            Some(scheduler) => scheduler.schedule(fire).err(),
            None => Some(fire),
        };

        // No sweep to defer to; fire here rather than lose it
        if let Some(fire) = undelivered {
            self.callbacks.fire(fire.kind, fire.api_id, fire.status);
        }
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("started", &self.is_started())
            .field("exception", &self.has_exception())
            .field("alive", &self.is_alive())
            .finish()
    }
}
