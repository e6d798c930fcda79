//! In-process transport over `tokio::io::duplex`.

use super::{BoxedStream, Connector};
use crate::config::TransportConfig;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Client half of an in-process transport.
///
/// Every `connect` creates a fresh duplex pipe and hands the far end to the
/// paired [`MemoryAcceptor`] together with the endpoint that was asked for.
#[derive(Debug)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<(String, DuplexStream)>,
    capacity: usize,
    connects: AtomicUsize,
}

/// Server half of an in-process transport.
#[derive(Debug)]
pub struct MemoryAcceptor {
    rx: mpsc::UnboundedReceiver<(String, DuplexStream)>,
}

impl MemoryConnector {
    /// Create a connected connector/acceptor pair.
    pub fn pair() -> (MemoryConnector, MemoryAcceptor) {
        Self::with_capacity(TransportConfig::MEMORY_PIPE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (MemoryConnector, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                tx,
                capacity,
                connects: AtomicUsize::new(0),
            },
            MemoryAcceptor { rx },
        )
    }

    /// Number of streams opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> io::Result<BoxedStream> {
        let (near, far) = tokio::io::duplex(self.capacity);
        self.tx.send((endpoint.to_string(), far)).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "memory acceptor is gone")
        })?;
        self.connects.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(near))
    }
}

impl MemoryAcceptor {
    /// Wait for the next connection. `None` once the connector is dropped.
    pub async fn accept(&mut self) -> Option<(String, DuplexStream)> {
        self.rx.recv().await
    }
}
