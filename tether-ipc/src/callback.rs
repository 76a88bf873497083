//! Per-kind result handlers with uniform failure dispatch
//!
//! Every API kind registers exactly one handler of shape `(ApiId, Status, R)`.
//! Failures are reported through the same handler with `R::default()`, so
//! callers write one code path: check the status, then read the payload.

use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::protocol::{ApiId, ApiKind, ApiResponse, ApiResult};
use crate::status::Status;

/// Type-erased callback slot
trait Slot: Send + Sync {
    fn fire_default(&self, api_id: ApiId, status: Status);

    fn fire_result(&self, api_id: ApiId, status: Status, result: ApiResult) -> Result<(), ApiResult>;
}

struct TypedSlot<R, F> {
    handler: F,
    _result: PhantomData<fn(R)>,
}

impl<R, F> Slot for TypedSlot<R, F>
where
    R: ApiResponse,
    F: Fn(ApiId, Status, R) + Send + Sync,
{
    fn fire_default(&self, api_id: ApiId, status: Status) {
        (self.handler)(api_id, status, R::default());
    }

    fn fire_result(&self, api_id: ApiId, status: Status, result: ApiResult) -> Result<(), ApiResult> {
        let typed = R::from_result(result)?;
        (self.handler)(api_id, status, typed);
        Ok(())
    }
}

/// Handler storage, one slot per [`ApiKind`]
#[derive(Default)]
pub struct CallbackTable {
    slots: RwLock<HashMap<ApiKind, Arc<dyn Slot>>>,
}

impl CallbackTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler for `R::KIND`, replacing any previous one
    pub fn register<R, F>(&self, handler: F)
    where
        R: ApiResponse,
        F: Fn(ApiId, Status, R) + Send + Sync + 'static,
    {
        let slot: Arc<dyn Slot> = Arc::new(TypedSlot {
            handler,
            _result: PhantomData::<fn(R)>,
        });

        if self.slots.write().insert(R::KIND, slot).is_some() {
            debug!("Replaced callback handler for {}", R::KIND);
        }
    }

    /// Whether a handler is installed for `kind`
    pub fn is_registered(&self, kind: ApiKind) -> bool {
        self.slots.read().contains_key(&kind)
    }

    /// Fire the handler for `kind` with `status` and the kind's default payload.
    ///
    /// Unregistered kinds are a no-op.
    pub fn fire(&self, kind: ApiKind, api_id: ApiId, status: Status) {
        if let Some(slot) = self.slot(kind) {
            slot.fire_default(api_id, status);
        }
    }

    /// Fire the handler matching the result's kind with a decoded payload.
    ///
    /// Returns `false` when no handler is installed for that kind.
    pub fn fire_result(&self, api_id: ApiId, status: Status, result: ApiResult) -> bool {
        let kind = result.kind();
        let Some(slot) = self.slot(kind) else {
            return false;
        };

        if let Err(result) = slot.fire_result(api_id, status, result) {
            // Only reachable if a slot was registered under the wrong kind
            warn!("Result {:?} did not match the {} handler", result.kind(), kind);
            return false;
        }
        true
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.slots.write().clear();
    }

    // The lock is released before the handler runs, so handlers may re-register.
    fn slot(&self, kind: ApiKind) -> Option<Arc<dyn Slot>> {
        self.slots.read().get(&kind).cloned()
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<ApiKind> = self.slots.read().keys().copied().collect();
        f.debug_struct("CallbackTable").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RankEntry, RankResult, RewardResult, VersionInfo};
    use parking_lot::Mutex;

    #[test]
    fn test_fire_without_handler_is_noop() {
        let table = CallbackTable::new();
        assert!(!table.is_registered(ApiKind::Version));
        table.fire(ApiKind::Version, 1, Status::Timeout);
        assert!(!table.fire_result(1, Status::Success, ApiResult::Version(VersionInfo::default())));
    }

    #[test]
    fn test_failure_fires_default_payload() {
        let table = CallbackTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        table.register(move |api_id, status, result: RankResult| {
            sink.lock().push((api_id, status, result));
        });

        table.fire(ApiKind::RankResult, 9, Status::NotReady);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 9);
        assert_eq!(seen[0].1, Status::NotReady);
        assert_eq!(seen[0].2, RankResult::default());
    }

    #[test]
    fn test_success_fires_typed_payload() {
        let table = CallbackTable::new();
        let seen = Arc::new(Mutex::new(None));

        let sink = seen.clone();
        table.register(move |_, status, result: RankResult| {
            *sink.lock() = Some((status, result));
        });

        let payload = RankResult {
            handle: 3,
            ranks: vec![RankEntry { account: "alice".to_string(), score: 0.75 }],
        };
        assert!(table.fire_result(5, Status::Success, ApiResult::RankResult(payload.clone())));
        assert_eq!(seen.lock().clone(), Some((Status::Success, payload)));
    }

    #[test]
    fn test_reregistration_overwrites() {
        let table = CallbackTable::new();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));

        let counter = first.clone();
        table.register(move |_, _, _: RewardResult| *counter.lock() += 1);
        let counter = second.clone();
        table.register(move |_, _, _: RewardResult| *counter.lock() += 1);

        table.fire(ApiKind::Reward, 1, Status::Timeout);
        assert_eq!(*first.lock(), 0);
        assert_eq!(*second.lock(), 1);
    }

    #[test]
    fn test_handler_may_reenter_table() {
        let table = Arc::new(CallbackTable::new());
        let inner = table.clone();
        table.register(move |_, _, _: VersionInfo| {
            inner.register(|_, _, _: RewardResult| {});
        });

        table.fire(ApiKind::Version, 1, Status::Exception);
        assert!(table.is_registered(ApiKind::Reward));

        table.clear();
        assert!(!table.is_registered(ApiKind::Version));
    }
}
