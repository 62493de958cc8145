//! Scrape coordination and snapshot publication.
//!
//! One [`Scraper`] drives collection cycles on a fixed timer. A cycle is
//! gated on a version probe and, when stale, a refresh of the table
//! catalog; everything after that tolerates partial failure. The result of
//! a cycle is a [`Snapshot`] published wholesale: readers observe either
//! the previous snapshot or the new one, never a mixture.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

use crate::jolokia::model::{
    ClientRequestStats, CompactionStats, CqlStats, Gauge, GcStats, MemoryStats, StorageCoreStats,
    StorageStats, Table, TableStats, ThreadPoolStats,
};
use crate::jolokia::{Error, MetricSource};
use crate::signals::Shutdown;

/// How often the table catalog is refreshed. Table churn is rare compared
/// to the scrape interval, and listing tables is not free.
const TABLE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Everything collected in one scrape cycle.
///
/// Each cluster-wide group is either present or absent; absent means the
/// group's fetch failed this cycle. A failed group is never filled with
/// zeroes, which would be indistinguishable from real zero readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Per-table statistics, sorted by `keyspace.table`. Tables whose fetch
    /// failed this cycle are omitted.
    pub table_stats: Vec<TableStats>,
    /// CQL statement statistics.
    pub cql: Option<CqlStats>,
    /// Thread pool statistics, sorted by pool name.
    pub thread_pools: Option<Vec<ThreadPoolStats>>,
    /// Compaction statistics.
    pub compaction: Option<CompactionStats>,
    /// Client request statistics, sorted by request type.
    pub client_requests: Option<Vec<ClientRequestStats>>,
    /// Clients connected over the native protocol.
    pub connected_clients: Option<Gauge>,
    /// Java process memory usage.
    pub memory: Option<MemoryStats>,
    /// Garbage collection statistics, sorted by collector name.
    pub gc: Option<Vec<GcStats>>,
    /// Storage topology.
    pub storage: Option<StorageStats>,
    /// Hints and internal exceptions.
    pub storage_core: Option<StorageCoreStats>,
    /// Wall-clock time the collection finished.
    pub scrape_time: SystemTime,
    /// How long the collection took.
    pub scrape_duration: Duration,
}

/// A cloneable read handle onto the most recently published [`Snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Option<Arc<Snapshot>>>>,
}

impl SnapshotHandle {
    /// The latest published snapshot, or `None` before the first
    /// successful cycle.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the published snapshot wholesale.
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        let snapshot = Some(Arc::new(snapshot));
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

/// Drives periodic collection against a [`MetricSource`] and publishes the
/// resulting snapshots.
#[derive(Debug)]
pub struct Scraper<S> {
    source: Arc<S>,
    concurrency: usize,
    shutdown: Shutdown,
    tables: Vec<Table>,
    last_table_refresh: Option<Instant>,
    published: SnapshotHandle,
}

impl<S> Scraper<S>
where
    S: MetricSource + Send + Sync + 'static,
{
    /// Create a new [`Scraper`]. `concurrency` bounds how many per-table
    /// fetches run at once, independent of how many tables exist.
    #[must_use]
    pub fn new(source: Arc<S>, concurrency: usize, shutdown: Shutdown) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
            shutdown,
            tables: Vec::new(),
            last_table_refresh: None,
            published: SnapshotHandle::default(),
        }
    }

    /// A read handle onto the snapshots this scraper will publish.
    #[must_use]
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.published.clone()
    }

    /// Run collection cycles until shutdown is signalled.
    ///
    /// The first cycle starts immediately; later cycles follow the timer.
    /// Shutdown is observed only between cycles, so an in-flight cycle
    /// always runs to completion.
    pub async fn run(mut self, interval: Duration) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // The first tick completes immediately, giving the eager
                // initial cycle.
                _ = ticker.tick() => self.run_cycle().await,
                () = shutdown.recv() => {
                    info!("shutdown signal received, stopping scraper");
                    return;
                }
            }
        }
    }

    /// One full collection cycle: probe, catalog refresh if stale, table
    /// fetch, cluster-wide group fetches, snapshot commit.
    async fn run_cycle(&mut self) {
        let start = Instant::now();

        // Probe first. If the bridge cannot even report a version there is
        // no point issuing the rest of the cycle.
        match self.source.version().await {
            Ok(version) => debug!("probed Jolokia {version}"),
            Err(err) => {
                warn!("could not probe the bridge, skipping cycle: {err}");
                return;
            }
        }

        if self.catalog_stale() {
            match self.source.tables().await {
                Ok(tables) => {
                    debug!("refreshed table catalog, {count} tables", count = tables.len());
                    self.tables = tables;
                    self.last_table_refresh = Some(Instant::now());
                }
                Err(err) => {
                    warn!("could not refresh the table catalog, skipping cycle: {err}");
                    return;
                }
            }
        }

        let snapshot = self.collect().await;
        self.published.publish(snapshot);
        debug!(
            tables = self.tables.len(),
            elapsed = ?start.elapsed(),
            "finished scrape cycle"
        );
    }

    fn catalog_stale(&self) -> bool {
        self.tables.is_empty()
            || self
                .last_table_refresh
                .is_none_or(|at| at.elapsed() > TABLE_REFRESH_INTERVAL)
    }

    /// Collect everything below the gate. Per-table and per-group failures
    /// are logged and tolerated.
    async fn collect(&self) -> Snapshot {
        let start = Instant::now();

        let table_stats = self.collect_table_stats().await;

        let cql = tolerate("CQL", self.source.cql_stats().await);
        let thread_pools = tolerate("thread pool", self.source.thread_pool_stats().await);
        let compaction = tolerate("compaction", self.source.compaction_stats().await);
        let client_requests =
            tolerate("client request", self.source.client_request_stats().await);
        let connected_clients =
            tolerate("connected client", self.source.connected_clients().await);
        let memory = tolerate("memory", self.source.memory_stats().await);
        let gc = tolerate("GC", self.source.gc_stats().await);
        let storage = tolerate("storage", self.source.storage_stats().await);
        let storage_core = tolerate("storage core", self.source.storage_core_stats().await);

        Snapshot {
            table_stats,
            cql,
            thread_pools,
            compaction,
            client_requests,
            connected_clients,
            memory,
            gc,
            storage,
            storage_core,
            scrape_time: SystemTime::now(),
            scrape_duration: start.elapsed(),
        }
    }

    /// Fetch stats for every catalogued table through a fixed-size pool of
    /// workers draining a shared queue. The pool is joined before the
    /// result is assembled, and the result is ordered by `keyspace.table`
    /// regardless of completion order.
    async fn collect_table_stats(&self) -> Vec<TableStats> {
        if self.tables.is_empty() {
            return Vec::new();
        }

        let (queue_tx, queue_rx) = mpsc::channel::<Table>(self.tables.len());
        for table in &self.tables {
            // Capacity equals the table count, so this never blocks.
            let _ = queue_tx.send(table.clone()).await;
        }
        drop(queue_tx);

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut pool = JoinSet::new();
        for _ in 0..self.concurrency {
            let queue_rx = Arc::clone(&queue_rx);
            let source = Arc::clone(&self.source);
            pool.spawn(async move {
                let mut collected = Vec::new();
                loop {
                    let table = match queue_rx.lock() {
                        Ok(mut receiver) => receiver.try_recv().ok(),
                        Err(poisoned) => poisoned.into_inner().try_recv().ok(),
                    };
                    let Some(table) = table else { break };

                    match source.table_stats(table.clone()).await {
                        Ok(stats) => collected.push(stats),
                        Err(err) => {
                            // Not the end of the world; the table is simply
                            // absent from this cycle's snapshot.
                            warn!(
                                "could not fetch table stats for {name}: {err}",
                                name = table.qualified_name()
                            );
                        }
                    }
                }
                collected
            });
        }

        let mut table_stats = Vec::with_capacity(self.tables.len());
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(batch) => table_stats.extend(batch),
                Err(err) => warn!("table fetch worker failed: {err}"),
            }
        }

        table_stats.sort_by_key(|stats| stats.table.qualified_name());
        table_stats
    }
}

/// Classify a group fetch result: a failure leaves the group absent from
/// the snapshot and is logged, never fatal.
fn tolerate<T>(group: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("could not fetch {group} stats: {err}");
            None
        }
    }
}
