//! IPC transport implementations
//!
//! Messages travel as newline-delimited JSON envelopes over any byte stream
//! pair: a child's stdin/stdout, or an in-memory duplex in tests.

use log::trace;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Owned read half of a runtime channel
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned write half of a runtime channel
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half: decodes one envelope per line
pub struct LineReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Send + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Receive the next envelope, skipping blank lines.
    ///
    /// End of stream is reported as [`IpcError::ConnectionClosed`]. A bad line
    /// is consumed whole before its error is returned, so the next call starts
    /// on a fresh line.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            let text = std::str::from_utf8(&self.line)
                .map_err(|e| IpcError::InvalidMessage(e.to_string()))?;
            let trimmed = text.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            trace!("ipc <- {}", trimmed);

            let envelope: MessageEnvelope<T> = serde_json::from_str(trimmed)?;

            if envelope.protocol_version != IPC_PROTOCOL_VERSION {
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(envelope);
        }
    }
}

/// Write half: encodes one envelope per line and flushes
pub struct LineWriter<W> {
    writer: Option<W>,
}

impl<W: AsyncWrite + Send + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Some(writer) }
    }

    pub async fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let writer = self.writer.as_mut().ok_or(IpcError::ConnectionClosed)?;

        let json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        trace!("ipc -> {}", json);

        // Send with newline delimiter
        writer.write_all(format!("{}\n", json).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the stream down; further sends fail with `ConnectionClosed`
    pub async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
