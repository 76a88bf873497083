//! Holder for the current channel to the runtime
//!
//! The holder is the only owner of the connection. Callers never keep a
//! reference; they borrow it for the duration of [`ConnectionHolder::with_connection`].

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::IpcError;
use crate::protocol::{HostMessage, MessageEnvelope};

/// A usable channel to the runtime
pub trait Connection: Send + Sync {
    /// Queue a message for the runtime
    fn send(&self, message: HostMessage) -> Result<(), IpcError>;

    /// Whether the channel can still carry messages
    fn is_valid(&self) -> bool {
        true
    }
}

/// Identifies one installed connection, so a stale link cannot clear its successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Installed {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
}

/// Single source of truth for "is there a usable channel to the runtime"
#[derive(Default)]
pub struct ConnectionHolder {
    current: Mutex<Option<Installed>>,
    next_id: AtomicU64,
}

impl ConnectionHolder {
    /// Create a holder with no connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection, replacing any previous one
    pub fn set(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *self.current.lock() = Some(Installed { id, connection });
        info!("Runtime connection {:?} installed", id);
        id
    }

    /// Drop the current connection
    pub fn clear(&self) {
        if let Some(old) = self.current.lock().take() {
            info!("Runtime connection {:?} cleared", old.id);
        }
    }

    /// Drop the current connection only if it is still `id`
    pub fn clear_if(&self, id: ConnectionId) -> bool {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(installed) if installed.id == id => {
                *current = None;
                info!("Runtime connection {:?} cleared", id);
                true
            }
            _ => {
                debug!("Connection {:?} already replaced, nothing to clear", id);
                false
            }
        }
    }

    /// Whether a valid connection is installed
    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|installed| installed.connection.is_valid())
    }

    /// Run `f` against the connection if a valid one exists.
    ///
    /// The lock is held for the duration of `f` and released before returning.
    pub fn with_connection<T>(&self, f: impl FnOnce(&dyn Connection) -> T) -> Option<T> {
        let current = self.current.lock();
        match current.as_ref() {
            Some(installed) if installed.connection.is_valid() => Some(f(installed.connection.as_ref())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConnectionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHolder")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Connection that hands envelopes to a writer task through an unbounded queue
pub struct ChannelConnection {
    sender: mpsc::UnboundedSender<MessageEnvelope<HostMessage>>,
}

impl ChannelConnection {
    /// Create a connection and the receiving end its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MessageEnvelope<HostMessage>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Connection for ChannelConnection {
    fn send(&self, message: HostMessage) -> Result<(), IpcError> {
        self.sender
            .send(MessageEnvelope::new(message))
            .map_err(|_| IpcError::ConnectionClosed)
    }

    fn is_valid(&self) -> bool {
        !self.sender.is_closed()
    }
}
