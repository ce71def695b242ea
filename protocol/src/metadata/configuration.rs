//! Fetch session configuration types and constants.

use std::fmt;
use std::time::Duration;

/// Default timeout for TCP connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for any single read from the peer.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Default ceiling on a whole session, handshake to last piece.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeouts applied to a metadata fetch session.
///
/// Peers found through the DHT are frequently gone, firewalled or slow, so
/// every blocking step is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfiguration {
    /// Timeout for connection establishment.
    pub connect_timeout: Duration,
    /// Timeout for each read (handshake or one framed message).
    pub read_timeout: Duration,
    /// Timeout for the session once connected.
    pub session_timeout: Duration,
}

impl Default for FetchConfiguration {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl FetchConfiguration {
    /// Set the timeout for connection establishment.
    ///
    /// # Arguments
    ///
    /// * `timeout` - The maximum time to wait for the TCP connect (defaults to 10 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the timeout for each individual read.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the timeout for a whole session.
    ///
    /// This bounds a peer that trickles bytes just fast enough to beat the
    /// per-read timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

impl fmt::Display for FetchConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FetchConfiguration {{ connect: {:?}, read: {:?}, session: {:?} }}",
            self.connect_timeout, self.read_timeout, self.session_timeout
        )
    }
}
