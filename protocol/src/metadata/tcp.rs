//! TCP connection establishment for fetch sessions.

use super::error::FetchError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connects to a peer within `connect_timeout`.
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream, FetchError> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr)).await??;
    // The exchange is a series of small request/response messages.
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect(addr, Duration::from_secs(1)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(connect(addr, Duration::from_secs(1)).await.is_err());
    }
}
