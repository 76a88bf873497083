//! Timer-driven request registry
//!
//! Every in-flight call has a [`PendingRequest`] with a countdown. The sweep
//! calls [`RequestRegistry::tick`] once per interval; the countdown, not wall
//! time, decides when a request is retried and when it times out.
//!
//! Lock discipline: the entry map has its own mutex, which is never held while
//! a retry action or a callback runs. Terminal outcomes (timeout or reply)
//! detach the entry under the lock before firing, so each `ApiId` gets at most
//! one terminal callback.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use tether_config::RegistryConfig;
use tether_ipc::{ApiId, ApiKind, ApiResult, CallbackTable, Status};

use crate::error::RegistryError;

/// Resend action for a pending request
pub type RetryAction = Arc<dyn Fn() + Send + Sync>;

/// One in-flight call
pub struct PendingRequest {
    pub kind: ApiKind,
    /// Ticks left before the request times out
    pub remaining: u32,
    pub retry: Option<RetryAction>,
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kind", &self.kind)
            .field("remaining", &self.remaining)
            .field("retryable", &self.retry.is_some())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub retried: Vec<ApiId>,
    pub timed_out: Vec<ApiId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.retried.is_empty() && self.timed_out.is_empty()
    }
}

/// Registry of in-flight requests
pub struct RequestRegistry {
    entries: Mutex<HashMap<ApiId, PendingRequest>>,
    callbacks: Arc<CallbackTable>,
    timeout_ticks: u32,
    retry_every: u32,
}

impl RequestRegistry {
    /// Create a registry with the configured cadence
    pub fn new(callbacks: Arc<CallbackTable>, config: &RegistryConfig) -> Self {
        Self::with_cadence(callbacks, config.timeout_ticks, config.retry_every)
    }

    /// Create a registry with an explicit cadence; `retry_every == 0` disables retries
    pub fn with_cadence(callbacks: Arc<CallbackTable>, timeout_ticks: u32, retry_every: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            callbacks,
            timeout_ticks,
            retry_every,
        }
    }

    /// Track a request with the default timeout
    pub fn register(
        &self,
        api_id: ApiId,
        kind: ApiKind,
        retry: Option<RetryAction>,
    ) -> Result<(), RegistryError> {
        self.register_with_timeout(api_id, kind, self.timeout_ticks, retry)
    }

    /// Track a request. A live entry for `api_id` is never overwritten.
    pub fn register_with_timeout(
        &self,
        api_id: ApiId,
        kind: ApiKind,
        timeout_ticks: u32,
        retry: Option<RetryAction>,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&api_id) {
            return Err(RegistryError::Duplicate(api_id));
        }

        entries.insert(
            api_id,
            PendingRequest {
                kind,
                remaining: timeout_ticks,
                retry,
                registered_at: Utc::now(),
            },
        );
        trace!(api_id, %kind, timeout_ticks, "registered request");
        Ok(())
    }

    /// Forget a request. Idempotent, and fires nothing.
    pub fn remove(&self, api_id: ApiId) -> Option<PendingRequest> {
        self.entries.lock().remove(&api_id)
    }

    /// Whether `api_id` is still pending
    pub fn is_alive(&self, api_id: ApiId) -> bool {
        self.entries.lock().contains_key(&api_id)
    }

    pub fn kind_of(&self, api_id: ApiId) -> Option<ApiKind> {
        self.entries.lock().get(&api_id).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every pending request without firing; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Complete a request with its reply.
    ///
    /// Fires `Success` only if the request was still pending and the result
    /// matches its kind. Late replies and mismatched kinds are dropped.
    pub fn resolve(&self, api_id: ApiId, result: ApiResult) -> bool {
        {
            let mut entries = self.entries.lock();
            match entries.get(&api_id) {
                None => {
                    debug!(api_id, "reply for a request that is no longer pending");
                    return false;
                }
                Some(entry) if entry.kind != result.kind() => {
                    warn!(
                        api_id,
                        expected = %entry.kind,
                        actual = %result.kind(),
                        "reply kind does not match pending request"
                    );
                    return false;
                }
                Some(_) => {
                    entries.remove(&api_id);
                }
            }
        }

        self.callbacks.fire_result(api_id, Status::Success, result);
        true
    }

    /// Advance every countdown by one tick.
    ///
    /// Must not be called concurrently with itself.
    pub fn tick(&self) -> TickReport {
        let mut expired = Vec::new();
        let mut due = Vec::new();

        {
            let mut entries = self.entries.lock();
            entries.retain(|&api_id, entry| {
                entry.remaining = entry.remaining.saturating_sub(1);
                if entry.remaining == 0 {
                    expired.push((api_id, entry.kind));
                    return false;
                }
                if self.retry_every != 0 && entry.remaining % self.retry_every == 0 {
                    due.push(api_id);
                }
                true
            });
        }

        let mut report = TickReport::default();

        for (api_id, kind) in expired {
            debug!(api_id, %kind, "request timed out");
            self.callbacks.fire(kind, api_id, Status::Timeout);
            report.timed_out.push(api_id);
        }

        for api_id in due {
            // A reply may have removed it since the map was released
            let retry = match self.entries.lock().get(&api_id) {
                Some(entry) => entry.retry.clone(),
                None => continue,
            };

            if let Some(retry) = retry {
                debug!(api_id, "retrying request");
                retry();
                report.retried.push(api_id);
            }
        }

        report
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("pending", &self.len())
            .field("timeout_ticks", &self.timeout_ticks)
            .field("retry_every", &self.retry_every)
            .finish()
    }
}
