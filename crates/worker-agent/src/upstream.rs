//! Line protocol to the parent process.
//!
//! The parent agent reads the worker's stdout one line at a time. Messages
//! are queued on an unbounded channel and written by a single task, so
//! senders never block on the pipe.

use crate::observability::metrics;
use std::fmt;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Message understood by the parent agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMessage {
    /// All roles acquired; the worker is serving.
    Ready,
    /// Liveness heartbeat.
    ImOk,
    /// Setup failed; the worker is exiting.
    Error,
    /// The declared purpose matched no controller.
    AmbiguousPurpose,
}

impl UpstreamMessage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            UpstreamMessage::Ready => "READY",
            UpstreamMessage::ImOk => "IMOK",
            UpstreamMessage::Error => "ERROR",
            UpstreamMessage::AmbiguousPurpose => "ambiguous purpose",
        }
    }
}

impl fmt::Display for UpstreamMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sending half of the parent channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ParentChannel {
    tx: mpsc::UnboundedSender<UpstreamMessage>,
}

impl ParentChannel {
    /// Spawn the writer task over `writer`.
    ///
    /// The task ends once every `ParentChannel` clone is dropped, or on the
    /// first write error (the parent closed its end).
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_lines(rx, writer));
        (Self { tx }, handle)
    }

    /// A channel whose receiving end is handed to the caller.
    #[must_use]
    pub fn from_test_channel() -> (Self, mpsc::UnboundedReceiver<UpstreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `message` for the parent.
    ///
    /// Returns `false` if the writer has stopped.
    pub fn send(&self, message: UpstreamMessage) -> bool {
        if self.tx.send(message).is_err() {
            debug!(
                target: "worker.upstream",
                message = message.as_str(),
                "Parent channel closed, message dropped"
            );
            return false;
        }
        metrics::record_upstream(message.as_str());
        true
    }

    /// Whether the writer has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<UpstreamMessage>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = format!("{message}\n");
        if let Err(e) = write_line(&mut writer, line.as_bytes()).await {
            warn!(
                target: "worker.upstream",
                error = %e,
                "Failed to write to parent, closing channel"
            );
            return Err(e);
        }
    }
    Ok(())
}

async fn write_line<W>(writer: &mut W, line: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line).await?;
    writer.flush().await
}
