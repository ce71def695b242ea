//! Boundary through which harvested torrents leave the crawler.

use dht_spider_protocol::TorrentRecord;
use log::debug;
use std::future::Future;
use tokio::sync::mpsc;

/// Consumer of verified torrent descriptors.
///
/// Persistence, indexing or whatever else happens downstream sits behind this
/// trait. It is called from fetch tasks, so implementations must be shareable
/// across them.
pub trait Ingest: Send + Sync + 'static {
    fn ingest(&self, record: TorrentRecord) -> impl Future<Output = ()> + Send;
}

/// Forwards records into a channel. A closed receiver drops the record.
impl Ingest for mpsc::Sender<TorrentRecord> {
    fn ingest(&self, record: TorrentRecord) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.send(record).await {
                debug!("Ingest receiver dropped, discarding {}", e.0.info_hash);
            }
        }
    }
}
