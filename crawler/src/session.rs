//! Internal fetch pool coordination.
//!
//! This module contains the [`FetchPool`] which drains the fetch queue and
//! runs one metadata session per announced hash, never more than the
//! configured number at a time.

use crate::connection::Connector;
use crate::dispatch::{CrawlStats, HashPair};
use crate::ingest::Ingest;
use dht_spider_protocol::{fetch_metadata, random_bytes, FetchConfiguration};
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Result of a single fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskResult {
    /// Metadata verified and handed to the ingest boundary.
    Ingested,
    /// Could not reach the peer.
    ConnectionFailed,
    /// The session aborted after connecting.
    FetchFailed,
}

/// Bounded pool of metadata fetch sessions.
///
/// # Architecture
///
/// * **Coordinator** (`coordinate()`) - Pulls hash pairs off the fetch queue and
///   spawns one task per pair while holding a semaphore permit.
/// * **Processors** (`process()`) - Run a single session and ingest its record.
///
/// Tasks live in a [`JoinSet`] owned by the coordinator, so aborting the
/// coordinator aborts every session in flight.
pub struct FetchPool<C, I> {
    connector: C,
    ingest: Arc<I>,
    config: FetchConfiguration,
    max_sessions: usize,
    stats: Arc<CrawlStats>,
}

impl<C: Clone, I> Clone for FetchPool<C, I> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            ingest: Arc::clone(&self.ingest),
            config: self.config,
            max_sessions: self.max_sessions,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<C: Connector, I: Ingest> FetchPool<C, I> {
    pub fn new(
        connector: C,
        ingest: Arc<I>,
        config: FetchConfiguration,
        max_sessions: usize,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Self {
            connector,
            ingest,
            config,
            // A zero sized pool would never make progress.
            max_sessions: max_sessions.max(1),
            stats,
        }
    }

    /// Runs one fetch session against the announcing peer.
    async fn process(&self, pair: HashPair) -> TaskResult {
        debug!("Fetching metadata for {pair}");

        let stream = match self.connector.connect(pair.peer).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Failed to connect to {}: {e}", pair.peer);
                return TaskResult::ConnectionFailed;
            }
        };

        match fetch_metadata(stream, pair.info_hash, random_bytes(), &self.config).await {
            Ok(record) => {
                info!("Fetched {record}");
                self.ingest.ingest(record).await;
                CrawlStats::increment(&self.stats.records_ingested);
                TaskResult::Ingested
            }
            Err(e) => {
                debug!("Metadata fetch for {pair} failed: {e}");
                TaskResult::FetchFailed
            }
        }
    }

    /// Drains `hashes` until the queue closes, then waits for in-flight
    /// sessions to finish.
    pub async fn coordinate(&self, mut hashes: mpsc::Receiver<HashPair>) {
        let permits = Arc::new(Semaphore::new(self.max_sessions));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    debug!("Fetch task completed with result: {result:?}");
                }
                pair = hashes.recv() => {
                    let Some(pair) = pair else {
                        break;
                    };
                    // Acquire_owned so that it can be moved into the spawned task.
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let pool = self.clone();
                    tasks.spawn(async move {
                        let result = pool.process(pair).await;
                        drop(permit);
                        result
                    });
                }
            }
        }

        debug!("Fetch queue closed, waiting on {} sessions", tasks.len());
        while tasks.join_next().await.is_some() {}
    }
}
