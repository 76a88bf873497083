//! Inter-process communication for Tether
//!
//! This crate provides the shared vocabulary of the control plane: the status
//! taxonomy, the wire protocol, the per-kind callback table, the connection
//! holder and the line-delimited transport used to talk to the runtime.

pub mod callback;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod status;
pub mod transport;

// Re-export commonly used types
pub use callback::CallbackTable;
pub use connection::{ChannelConnection, Connection, ConnectionHolder, ConnectionId};
pub use error::IpcError;
pub use protocol::{
    ApiId, ApiKind, ApiRequest, ApiResponse, ApiResult, HostMessage, MessageEnvelope, RankEntry,
    RankResult, RewardEntry, RewardResult, RuntimeMessage, VersionInfo, IPC_PROTOCOL_VERSION,
};
pub use status::Status;
pub use transport::{BoxedReader, BoxedWriter, LineReader, LineWriter};
