mod builder;
mod connection;
mod crawler;
mod dispatch;
mod ingest;
mod session;

pub use builder::{CrawlerBuilder, CrawlerBuilderError, DEFAULT_LISTEN_ADDR, DEFAULT_SEEDS};
pub use crawler::{Crawler, CrawlerConfig, CrawlerError, CrawlerHandle};
pub use dispatch::{
    announce_port, Action, CrawlStats, Destination, DispatchError, Dispatcher, HashPair,
    OutboundQuery, OutboundResponse,
};
pub use ingest::Ingest;

// Re-exports.
pub use dht_spider_protocol::{
    FetchConfiguration, FetchError, InfoHash, NodeId, TorrentFile, TorrentRecord,
};
