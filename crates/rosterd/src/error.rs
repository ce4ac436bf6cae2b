//! Transport errors and the operator-facing error stream.

use std::net::SocketAddr;

use tokio::sync::mpsc::{self, error::TrySendError};

use roster_core::WireError;

/// Non-fatal failures raised by the announce and listen loops.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("receive failed: {0}")]
    Recv(#[source] std::io::Error),

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot from {from}: {source}")]
    Decode {
        from: SocketAddr,
        #[source]
        source: WireError,
    },

    #[error("failed to encode registry: {0}")]
    Encode(#[from] WireError),
}

/// Sending half of the error stream.
///
/// Reporting never blocks: when the stream is full or nobody is draining
/// it, the error is logged here and dropped.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<TransportError>,
}

impl ErrorSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransportError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn report(&self, err: TransportError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                tracing::debug!(error = %e, "error stream full, dropping");
            }
            Err(TrySendError::Closed(e)) => {
                tracing::warn!(error = %e, "error stream closed");
            }
        }
    }
}
