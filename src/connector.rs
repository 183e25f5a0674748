//! Connection factories used by the client phases.
//!
//! Each phase asks its [`Connector`] for a fresh stream whenever it needs one
//! instead of holding a long-lived handle. The submission phase connects once;
//! the winner poller connects once per attempt. Tests substitute in-memory
//! duplex streams through the same seam.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

/// Produces one connected byte stream per call.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type handed to the framed channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open a new connection to the server.
    ///
    /// # Errors
    /// Returns any error raised while establishing the connection.
    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Connects to the lottery server over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Return the configured server address.
    #[must_use]
    pub fn address(&self) -> &str { &self.address }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        debug!(address = %self.address, "connected to server");
        Ok(stream)
    }
}
