//! Builder pattern for configuring and creating crawler instances.

use crate::crawler::{Crawler, CrawlerConfig};
use dht_spider_protocol::{FetchConfiguration, TokenSecret};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default UDP address the crawler listens on.
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 6881));
/// Well-known bootstrap routers.
pub const DEFAULT_SEEDS: [&str; 3] = [
    "router.utorrent.com:6881",
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
];
/// Default period of the reseed check.
const DEFAULT_RESEED_INTERVAL: Duration = Duration::from_secs(15);
/// Default capacity of the query, response and inbound queues.
const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default capacity of the queue feeding the fetch pool.
const DEFAULT_FETCH_QUEUE_CAPACITY: usize = 10_000;
/// Default maximum number of concurrent fetch sessions.
const DEFAULT_FETCH_WORKERS: usize = 64;

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerBuilderError {
    /// A queue or pool was configured with zero capacity.
    ZeroCapacity(&'static str),
    /// The reseed interval was zero.
    ZeroReseedInterval,
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::ZeroCapacity(what) => {
                write!(f, "Capacity of the {what} must be at least one")
            }
            CrawlerBuilderError::ZeroReseedInterval => {
                write!(f, "Reseed interval must be non-zero")
            }
        }
    }
}

impl std::error::Error for CrawlerBuilderError {}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), dht_spider_crawler::CrawlerBuilderError> {
/// use dht_spider_crawler::CrawlerBuilder;
/// use std::time::Duration;
///
/// // Create a crawler with default seeds on 0.0.0.0:6881
/// let basic_crawler = CrawlerBuilder::new().build();
///
/// // Create a crawler with custom settings
/// let custom_crawler = CrawlerBuilder::new()
///     .with_listen_addr("0.0.0.0:16881".parse().unwrap())
///     .with_seeds(["dht.libtorrent.org:25401"])
///     .with_reseed_interval(Duration::from_secs(30))?
///     .with_fetch_workers(128)?
///     .with_token_verification(true)
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    /// UDP address to bind.
    listen_addr: SocketAddr,
    /// Bootstrap nodes as `host:port`.
    seeds: Vec<String>,
    /// How often to check whether the crawl needs reseeding.
    reseed_interval: Duration,
    /// Capacity of the query, response and inbound queues.
    queue_capacity: usize,
    /// Capacity of the fetch queue.
    fetch_queue_capacity: usize,
    /// Maximum number of concurrent fetch sessions.
    fetch_workers: usize,
    /// Timeouts for fetch sessions.
    fetch_config: FetchConfiguration,
    /// Secret for `get_peers` tokens, random when unset.
    token_secret: Option<TokenSecret>,
    /// Whether `announce_peer` must carry a token we issued.
    verify_tokens: bool,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerBuilder {
    /// Create a new crawler builder with default settings.
    pub fn new() -> Self {
        CrawlerBuilder {
            listen_addr: DEFAULT_LISTEN_ADDR,
            seeds: DEFAULT_SEEDS.iter().map(|seed| seed.to_string()).collect(),
            reseed_interval: DEFAULT_RESEED_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fetch_queue_capacity: DEFAULT_FETCH_QUEUE_CAPACITY,
            fetch_workers: DEFAULT_FETCH_WORKERS,
            fetch_config: FetchConfiguration::default(),
            token_secret: None,
            verify_tokens: false,
        }
    }

    /// Set the UDP address the crawler binds to.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Replace the bootstrap nodes.
    ///
    /// Seeds are `host:port` strings resolved each time they are queried. An
    /// empty list means the crawler only reacts to inbound traffic.
    ///
    /// # Arguments
    ///
    /// * `seeds` - The bootstrap nodes to use.
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_seeds<S, I>(mut self, seeds: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        self.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reseed check period.
    ///
    /// On every tick the seeds are queried again, but only if the outbound
    /// query queue is empty, meaning the random walk has run dry.
    ///
    /// # Arguments
    ///
    /// * `interval` - Time between checks (defaults to 15 seconds).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining.
    /// * `Err(CrawlerBuilderError)` - If `interval` is zero.
    pub fn with_reseed_interval(mut self, interval: Duration) -> Result<Self, CrawlerBuilderError> {
        if interval.is_zero() {
            return Err(CrawlerBuilderError::ZeroReseedInterval);
        }
        self.reseed_interval = interval;
        Ok(self)
    }

    /// Set the capacity of the query, response and inbound queues.
    ///
    /// A full query queue blocks the dispatcher, which is what throttles the
    /// crawl.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Queue capacity (defaults to 100).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Result<Self, CrawlerBuilderError> {
        if capacity == 0 {
            return Err(CrawlerBuilderError::ZeroCapacity("message queues"));
        }
        self.queue_capacity = capacity;
        Ok(self)
    }

    /// Set the capacity of the queue feeding the fetch pool (defaults to 10,000).
    pub fn with_fetch_queue_capacity(
        mut self,
        capacity: usize,
    ) -> Result<Self, CrawlerBuilderError> {
        if capacity == 0 {
            return Err(CrawlerBuilderError::ZeroCapacity("fetch queue"));
        }
        self.fetch_queue_capacity = capacity;
        Ok(self)
    }

    /// Set the maximum number of concurrent fetch sessions.
    ///
    /// # Recommendations
    ///
    /// * **Conservative (8-32)** - For constrained hosts or networks.
    /// * **Default (64)** - Good balance for most use cases.
    /// * **Aggressive (256+)** - For busy listen addresses with ample file descriptors.
    ///
    /// # Arguments
    ///
    /// * `workers` - Maximum concurrent sessions (defaults to 64).
    pub fn with_fetch_workers(mut self, workers: usize) -> Result<Self, CrawlerBuilderError> {
        if workers == 0 {
            return Err(CrawlerBuilderError::ZeroCapacity("fetch pool"));
        }
        self.fetch_workers = workers;
        Ok(self)
    }

    /// Set the timeouts applied to fetch sessions.
    pub fn with_fetch_configuration(mut self, config: FetchConfiguration) -> Self {
        self.fetch_config = config;
        self
    }

    /// Use a fixed secret for `get_peers` tokens instead of a random one.
    pub fn with_token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = Some(TokenSecret::new(secret));
        self
    }

    /// Require `announce_peer` to carry a token issued by this crawler.
    ///
    /// Off by default: a passive crawler wants every announcement it can see.
    pub fn with_token_verification(mut self, verify: bool) -> Self {
        self.verify_tokens = verify;
        self
    }

    /// Build the crawler with the configured options.
    ///
    /// # Returns
    ///
    /// A configured `Crawler` instance. Nothing is bound until
    /// [`Crawler::start`] is called.
    pub fn build(self) -> Crawler {
        Crawler::new(CrawlerConfig {
            listen_addr: self.listen_addr,
            seeds: self.seeds,
            reseed_interval: self.reseed_interval,
            queue_capacity: self.queue_capacity,
            fetch_queue_capacity: self.fetch_queue_capacity,
            fetch_workers: self.fetch_workers,
            fetch_config: self.fetch_config,
            token_secret: self.token_secret.unwrap_or_else(TokenSecret::random),
            verify_tokens: self.verify_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrawlerBuilder::new().build().config().clone();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.seeds, DEFAULT_SEEDS.to_vec());
        assert_eq!(config.reseed_interval, Duration::from_secs(15));
        assert_eq!(config.fetch_workers, 64);
        assert!(!config.verify_tokens);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert_eq!(
            CrawlerBuilder::new().with_queue_capacity(0).unwrap_err(),
            CrawlerBuilderError::ZeroCapacity("message queues")
        );
        assert_eq!(
            CrawlerBuilder::new().with_fetch_queue_capacity(0).unwrap_err(),
            CrawlerBuilderError::ZeroCapacity("fetch queue")
        );
        assert_eq!(
            CrawlerBuilder::new().with_fetch_workers(0).unwrap_err(),
            CrawlerBuilderError::ZeroCapacity("fetch pool")
        );
        assert_eq!(
            CrawlerBuilder::new()
                .with_reseed_interval(Duration::ZERO)
                .unwrap_err(),
            CrawlerBuilderError::ZeroReseedInterval
        );
    }

    #[test]
    fn test_overrides() {
        let config = CrawlerBuilder::new()
            .with_listen_addr("127.0.0.1:0".parse().unwrap())
            .with_seeds(Vec::<String>::new())
            .with_fetch_workers(3)
            .unwrap()
            .with_token_secret(b"fixed".to_vec())
            .with_token_verification(true)
            .build()
            .config()
            .clone();

        assert_eq!(config.listen_addr, "127.0.0.1:0".parse().unwrap());
        assert!(config.seeds.is_empty());
        assert_eq!(config.fetch_workers, 3);
        assert_eq!(config.token_secret, TokenSecret::new(b"fixed".to_vec()));
        assert!(config.verify_tokens);
    }
}
