//! The DHT crawler node.
//!
//! A running crawler is six tasks sharing one UDP socket and a handful of
//! bounded queues:
//!
//! ```text
//!  seeder ──┐                                  ┌──> query sender ──> UDP
//!           ├──> query queue ──────────────────┘
//!  UDP ──> receiver ──> inbound queue ──> dispatcher ──> response queue ──> response sender ──> UDP
//!                                            │  └──> query queue
//!                                            └──> fetch queue ──> fetch pool ──> ingest
//! ```
//!
//! Every push into a queue awaits free capacity, so a slow socket or a busy
//! fetch pool throttles the whole crawl instead of growing memory.

use crate::builder::CrawlerBuilder;
use crate::connection::TcpConnector;
use crate::dispatch::{
    Action, CrawlStats, Destination, Dispatcher, HashPair, InboundMessage, OutboundQuery,
    OutboundResponse,
};
use crate::ingest::Ingest;
use crate::session::FetchPool;
use dht_spider_protocol::bencode;
use dht_spider_protocol::{FetchConfiguration, NodeId, TokenSecret};
use log::{debug, info, trace};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Largest datagram read off the socket.
const RECV_BUFFER_LEN: usize = 8192;
/// Pause after a failed receive.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// How often the dispatcher logs crawl statistics.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that stop a crawler from starting.
#[derive(Debug)]
pub enum CrawlerError {
    /// The UDP socket could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerError::Bind { addr, source } => {
                write!(f, "Failed to bind UDP socket on {addr}: {source}")
            }
        }
    }
}

impl std::error::Error for CrawlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerError::Bind { source, .. } => Some(source),
        }
    }
}

/// Resolved crawler settings, produced by [`CrawlerBuilder`].
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub listen_addr: SocketAddr,
    pub seeds: Vec<String>,
    pub reseed_interval: Duration,
    pub queue_capacity: usize,
    pub fetch_queue_capacity: usize,
    pub fetch_workers: usize,
    pub fetch_config: FetchConfiguration,
    pub token_secret: TokenSecret,
    pub verify_tokens: bool,
}

/// A passive crawler for the BitTorrent mainline DHT.
///
/// The crawler answers queries just well enough to stay in other nodes'
/// routing tables, walks the DHT through `find_node`, and fetches the
/// metadata of every info-hash announced to it.
#[derive(Debug, Clone)]
pub struct Crawler {
    config: CrawlerConfig,
}

/// A started crawler.
///
/// Dropping the handle aborts every crawler task, fetch sessions included.
#[derive(Debug)]
pub struct CrawlerHandle {
    local_addr: SocketAddr,
    node_id: NodeId,
    stats: Arc<CrawlStats>,
    tasks: JoinSet<()>,
}

impl CrawlerHandle {
    /// Address the UDP socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Id this crawler presents to the DHT.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    /// Stops every task and waits for them to wind down.
    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
    }
}

impl Crawler {
    pub(crate) fn new(config: CrawlerConfig) -> Self {
        Crawler { config }
    }

    /// A builder with default settings.
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Binds the socket and spawns the crawler tasks.
    ///
    /// Each call generates a fresh node id. Harvested torrents are handed to
    /// `ingest` as they are verified.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlerError::Bind`] if the listen address is unavailable.
    /// Nothing else is fatal: malformed datagrams and failed fetches are
    /// logged and dropped.
    pub async fn start<I: Ingest>(&self, ingest: I) -> Result<CrawlerHandle, CrawlerError> {
        let addr = self.config.listen_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| CrawlerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| CrawlerError::Bind { addr, source })?;
        let socket = Arc::new(socket);

        let node_id = NodeId::random();
        let dispatcher = Dispatcher::new(
            node_id,
            self.config.token_secret.clone(),
            self.config.verify_tokens,
        );
        let stats = Arc::new(CrawlStats::default());

        let (query_tx, query_rx) = mpsc::channel(self.config.queue_capacity);
        let (response_tx, response_rx) = mpsc::channel(self.config.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.queue_capacity);
        let (fetch_tx, fetch_rx) = mpsc::channel(self.config.fetch_queue_capacity);

        let pool = FetchPool::new(
            TcpConnector::new(self.config.fetch_config.connect_timeout),
            Arc::new(ingest),
            self.config.fetch_config,
            self.config.fetch_workers,
            Arc::clone(&stats),
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(seed(
            dispatcher.clone(),
            self.config.seeds.clone(),
            self.config.reseed_interval,
            query_tx.clone(),
        ));
        tasks.spawn(send_queries(
            Arc::clone(&socket),
            query_rx,
            Arc::clone(&stats),
        ));
        tasks.spawn(send_responses(
            Arc::clone(&socket),
            response_rx,
            Arc::clone(&stats),
        ));
        tasks.spawn(receive(Arc::clone(&socket), inbound_tx, Arc::clone(&stats)));
        tasks.spawn(dispatch(
            dispatcher,
            inbound_rx,
            Outbound {
                queries: query_tx,
                responses: response_tx,
                fetches: fetch_tx,
            },
            Arc::clone(&stats),
        ));
        tasks.spawn(async move { pool.coordinate(fetch_rx).await });

        info!("Crawler {node_id:?} listening on {local_addr}");
        Ok(CrawlerHandle {
            local_addr,
            node_id,
            stats,
            tasks,
        })
    }
}

/// Queues the dispatcher feeds.
struct Outbound {
    queries: mpsc::Sender<OutboundQuery>,
    responses: mpsc::Sender<OutboundResponse>,
    fetches: mpsc::Sender<HashPair>,
}

/// Queries every seed now and again whenever the query queue runs dry.
async fn seed(
    dispatcher: Dispatcher,
    seeds: Vec<String>,
    period: Duration,
    queries: mpsc::Sender<OutboundQuery>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if queries.capacity() < queries.max_capacity() {
            trace!("Query queue busy, skipping reseed");
            continue;
        }

        debug!("Seeding from {} bootstrap nodes", seeds.len());
        for host in &seeds {
            if queries.send(dispatcher.seed_query(host)).await.is_err() {
                return;
            }
        }
    }
}

/// Resolves a `host:port` seed, preferring IPv4.
async fn resolve(host: &str) -> Option<SocketAddr> {
    let addrs: Vec<SocketAddr> = match lookup_host(host).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            debug!("Failed to resolve {host}: {e}");
            return None;
        }
    };
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

async fn send_queries(
    socket: Arc<UdpSocket>,
    mut queries: mpsc::Receiver<OutboundQuery>,
    stats: Arc<CrawlStats>,
) {
    while let Some(query) = queries.recv().await {
        let addr = match &query.destination {
            Destination::Resolved(addr) => *addr,
            Destination::Host(host) => match resolve(host).await {
                Some(addr) => addr,
                None => continue,
            },
        };
        match socket.send_to(&query.payload, addr).await {
            Ok(_) => CrawlStats::increment(&stats.queries_sent),
            Err(e) => debug!("Failed to send query to {addr}: {e}"),
        }
    }
}

async fn send_responses(
    socket: Arc<UdpSocket>,
    mut responses: mpsc::Receiver<OutboundResponse>,
    stats: Arc<CrawlStats>,
) {
    while let Some(response) = responses.recv().await {
        match socket
            .send_to(&response.encode(), response.destination)
            .await
        {
            Ok(_) => CrawlStats::increment(&stats.responses_sent),
            Err(e) => debug!("Failed to send response to {}: {e}", response.destination),
        }
    }
}

/// Reads datagrams and forwards those that decode as bencode.
async fn receive(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<InboundMessage>,
    stats: Arc<CrawlStats>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors for earlier sends surface here on some platforms.
                debug!("UDP receive failed: {e}");
                sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };

        match bencode::decode(&buf[..len]) {
            Ok(value) => {
                if inbound.send(InboundMessage { source, value }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                trace!("Dropping undecodable datagram from {source}: {e}");
                CrawlStats::increment(&stats.messages_dropped);
            }
        }
    }
}

async fn dispatch(
    dispatcher: Dispatcher,
    mut inbound: mpsc::Receiver<InboundMessage>,
    outbound: Outbound,
    stats: Arc<CrawlStats>,
) {
    let mut last_log_time = Instant::now();

    while let Some(InboundMessage { source, value }) = inbound.recv().await {
        let delivered = match dispatcher.dispatch(source, &value) {
            Ok(Action::Respond(response)) => outbound.responses.send(response).await.is_ok(),
            Ok(Action::Harvest(pair)) => {
                debug!("Harvested {pair}");
                CrawlStats::increment(&stats.hashes_harvested);
                outbound.fetches.send(pair).await.is_ok()
            }
            Ok(Action::Explore(queries)) => {
                let mut delivered = true;
                for query in queries {
                    if outbound.queries.send(query).await.is_err() {
                        delivered = false;
                        break;
                    }
                }
                delivered
            }
            Err(e) => {
                debug!("Dropping message from {source}: {e}");
                CrawlStats::increment(&stats.messages_dropped);
                true
            }
        };
        if !delivered {
            debug!("Outbound queue closed, stopping dispatcher");
            break;
        }

        // Periodic status logging, only while messages keep arriving.
        if last_log_time.elapsed() >= STATS_LOG_INTERVAL {
            info!("{stats}");
            last_log_time = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_spider_protocol::bencode::{decode, Value};
    use dht_spider_protocol::TorrentRecord;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(NodeId::random(), TokenSecret::random(), false)
    }

    #[tokio::test]
    async fn test_seed_queries_every_host() {
        let (tx, mut rx) = mpsc::channel(4);
        let seeder = tokio::spawn(seed(
            dispatcher(),
            vec!["a.example:6881".into(), "b.example:6881".into()],
            Duration::from_secs(3600),
            tx,
        ));

        for host in ["a.example:6881", "b.example:6881"] {
            let query = rx.recv().await.unwrap();
            assert_eq!(query.destination, Destination::Host(host.into()));
            let value = decode(&query.payload).unwrap();
            assert_eq!(value.get(b"q").and_then(Value::as_str), Some("find_node"));
        }
        seeder.abort();
    }

    #[tokio::test]
    async fn test_seed_skips_busy_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        let pending = OutboundQuery {
            destination: Destination::Resolved("10.0.0.1:6881".parse().unwrap()),
            payload: b"pending".to_vec(),
        };
        tx.send(pending.clone()).await.unwrap();

        let seeder = tokio::spawn(seed(
            dispatcher(),
            vec!["a.example:6881".into()],
            Duration::from_secs(3600),
            tx,
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rx.recv().await.unwrap(), pending);
        assert!(rx.try_recv().is_err());
        seeder.abort();
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        assert_eq!(
            resolve("127.0.0.1:6881").await,
            Some("127.0.0.1:6881".parse().unwrap())
        );
        assert_eq!(resolve("not a host").await, None);
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (records, _rx) = mpsc::channel::<TorrentRecord>(1);

        let result = CrawlerBuilder::new()
            .with_listen_addr(addr)
            .with_seeds(Vec::<String>::new())
            .build()
            .start(records)
            .await;
        assert!(matches!(result, Err(CrawlerError::Bind { addr: a, .. }) if a == addr));
    }
}
