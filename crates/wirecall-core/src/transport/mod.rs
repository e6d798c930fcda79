//! Byte-stream transports.
//!
//! A session only needs an ordered, reliable duplex stream. [`Connector`]
//! opens one for an endpoint string; [`TcpConnector`] is the default and
//! [`MemoryConnector`] keeps everything in process.

mod memory;

pub use memory::{MemoryAcceptor, MemoryConnector};

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// An ordered, reliable duplex byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Opens streams to remote endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> io::Result<BoxedStream>;
}

/// Connects over TCP. Endpoints are `host:port`; host names are resolved by
/// tokio.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }
}
