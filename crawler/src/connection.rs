//! Peer connection abstraction for fetch sessions.
//!
//! The [`Connector`] trait lets the fetch pool open peer-wire streams without
//! knowing whether they are real TCP sockets or in-memory test doubles.

use dht_spider_protocol::{connect, FetchError};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Factory trait for peer-wire streams.
pub trait Connector: Clone + Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open a stream to the peer at `addr`.
    fn connect(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<Self::Stream, FetchError>> + Send;
}

/// Standard connector that opens TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<Self::Stream, FetchError>> + Send {
        connect(addr, self.connect_timeout)
    }
}
