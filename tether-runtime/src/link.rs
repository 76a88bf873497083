//! Runtime message link
//!
//! Bridges the supervisor's lifecycle events to the connection holder. Each
//! time a runtime instance starts with a message channel, the link installs a
//! [`ChannelConnection`] and spawns a writer task that drains it and a reader
//! task that routes replies to the registry. The connection is cleared when
//! the reader reaches end of stream or the instance exits.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tether_ipc::{
    BoxedReader, BoxedWriter, ChannelConnection, ConnectionHolder, ConnectionId, HostMessage,
    IpcError, LineReader, LineWriter, MessageEnvelope, RuntimeMessage,
};

use crate::process::ProcessIo;
use crate::registry::RequestRegistry;
use crate::supervisor::ProcessObserver;

struct ActiveLink {
    id: ConnectionId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ActiveLink {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// [`ProcessObserver`] that keeps the connection holder in step with the runtime
pub struct RuntimeLink {
    connection: Arc<ConnectionHolder>,
    registry: Arc<RequestRegistry>,
    active: Mutex<Option<ActiveLink>>,
}

impl RuntimeLink {
    pub fn new(connection: Arc<ConnectionHolder>, registry: Arc<RequestRegistry>) -> Self {
        Self {
            connection,
            registry,
            active: Mutex::new(None),
        }
    }

    /// Drop the current connection and stop its tasks
    pub fn disconnect(&self) {
        if let Some(link) = self.active.lock().take() {
            self.connection.clear_if(link.id);
            link.abort();
            debug!("runtime link closed");
        }
    }

    fn connect(&self, io: ProcessIo) {
        let (connection, outbound) = ChannelConnection::channel();
        let id = self.connection.set(Arc::new(connection));

        let writer = tokio::spawn(write_loop(io.writer, outbound));
        let reader = tokio::spawn(read_loop(
            io.reader,
            self.registry.clone(),
            self.connection.clone(),
            id,
        ));

        if let Some(previous) = self.active.lock().replace(ActiveLink { id, reader, writer }) {
            previous.abort();
        }
        debug!(connection = ?id, "runtime link established");
    }
}

impl ProcessObserver for RuntimeLink {
    fn on_started(&self, pid: Option<u32>, io: Option<ProcessIo>) {
        self.disconnect();
        match io {
            Some(io) => self.connect(io),
            None => warn!(pid = ?pid, "runtime started without a message channel"),
        }
    }

    fn on_exited(&self, _code: Option<i32>) {
        self.disconnect();
    }
}

impl Drop for RuntimeLink {
    fn drop(&mut self) {
        if let Some(link) = self.active.get_mut().take() {
            link.abort();
        }
    }
}

async fn write_loop(
    writer: BoxedWriter,
    mut outbound: mpsc::UnboundedReceiver<MessageEnvelope<HostMessage>>,
) {
    let mut writer = LineWriter::new(writer);

    while let Some(envelope) = outbound.recv().await {
        if let Err(e) = writer.send(&envelope).await {
            warn!("failed to write to runtime: {}", e);
            break;
        }
    }

    let _ = writer.close().await;
}

async fn read_loop(
    reader: BoxedReader,
    registry: Arc<RequestRegistry>,
    connection: Arc<ConnectionHolder>,
    id: ConnectionId,
) {
    let mut reader = LineReader::new(reader);

    loop {
        match reader.receive::<RuntimeMessage>().await {
            Ok(envelope) => match envelope.message {
                RuntimeMessage::Reply { api_id, result } => {
                    registry.resolve(api_id, result);
                }
                RuntimeMessage::Ready { version } => {
                    info!(version = %version, "runtime ready");
                }
            },
            Err(IpcError::ConnectionClosed) => {
                debug!("runtime closed its message channel");
                break;
            }
            Err(e) if e.is_message_error() => {
                warn!("skipping unreadable runtime message: {}", e);
            }
            Err(e) => {
                error!("runtime link failed: {}", e);
                break;
            }
        }
    }

    // A newer instance may already own the holder
    connection.clear_if(id);
}
