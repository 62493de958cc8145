//! Typed metric taxonomy shared by the Jolokia client and the exporter.
//!
//! Cassandra exposes its metrics as a flat namespace of JMX beans. The types
//! here are the decoded, structured form of those beans: one record per
//! table, thread pool, request type or garbage collector, plus a handful of
//! singleton records for cluster-wide groups.

use std::time::Duration;

/// A monotonically non-decreasing event count. Only a restart of the
/// monitored Cassandra process resets it.
pub type Counter = u64;

/// A point-in-time integer reading with no ordering guarantee between
/// samples.
pub type Gauge = i64;

/// A point-in-time floating point reading.
pub type FloatGauge = f64;

/// A [`Gauge`] whose unit is bytes.
pub type BytesGauge = i64;

/// A keyspace and table pair as reported by the Cassandra table catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Table {
    /// Name of the keyspace the table belongs to.
    pub keyspace: String,
    /// Name of the table within its keyspace.
    pub table: String,
}

impl Table {
    /// The `keyspace.table` name used to order tables deterministically.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }
}

/// A decoded JMX histogram. Values carry whatever unit the bean reported,
/// unitless by default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Histogram {
    /// Smallest recorded value.
    pub min: f64,
    /// Largest recorded value.
    pub max: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
    /// Mean of all recorded values.
    pub mean: f64,
    /// Number of recorded values.
    pub count: u64,
}

/// A decoded JMX timer. Same shape as [`Histogram`] but every value field
/// has been scaled by the duration unit declared in the payload. The count
/// is never scaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latency {
    /// Smallest recorded duration.
    pub min: Duration,
    /// Largest recorded duration.
    pub max: Duration,
    /// 75th percentile.
    pub p75: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// 99.9th percentile.
    pub p999: Duration,
    /// Mean of all recorded durations.
    pub mean: Duration,
    /// Number of recorded durations.
    pub count: u64,
}

/// The fixed set of per-table statistics collected in one bulk request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStats {
    /// The table these statistics belong to.
    pub table: Table,

    /// Coordinator-level read latency.
    pub coordinator_read: Latency,
    /// Coordinator-level write latency.
    pub coordinator_write: Latency,
    /// Coordinator-level scan latency.
    pub coordinator_scan: Latency,
    /// Replica-local read latency.
    pub read_latency: Latency,
    /// Replica-local write latency.
    pub write_latency: Latency,
    /// Replica-local range scan latency.
    pub range_latency: Latency,
    /// CAS propose phase latency.
    pub cas_propose_latency: Latency,
    /// CAS commit phase latency.
    pub cas_commit_latency: Latency,

    /// Estimated number of partitions in the table.
    pub estimated_partition_count: Gauge,
    /// Compactions queued for this table.
    pub pending_compactions: Gauge,
    /// Disk space used by live `SSTables`.
    pub live_disk_space_used: BytesGauge,
    /// Disk space used by all `SSTables`, including obsolete ones.
    pub total_disk_space_used: BytesGauge,
    /// Number of live `SSTables`.
    pub live_sstables: Gauge,
    /// `SSTables` touched per read.
    pub sstables_per_read: Histogram,
    /// Size of the largest known partition.
    pub max_partition_size: BytesGauge,
    /// Mean partition size.
    pub mean_partition_size: BytesGauge,
    /// Bloom filter false positive ratio.
    pub bloom_filter_false_ratio: FloatGauge,
    /// Tombstones scanned per read.
    pub tombstones_scanned: Histogram,
    /// Live cells scanned per read.
    pub live_cells_scanned: Histogram,
    /// Key cache hit rate.
    pub key_cache_hit_rate: FloatGauge,
    /// Percentage of data repaired.
    pub percent_repaired: FloatGauge,
    /// Speculative retries issued.
    pub speculative_retries: Counter,
    /// Speculative retries that failed.
    pub speculative_failed_retries: Counter,
}

/// CQL statement statistics, including the prepared statement cache.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CqlStats {
    /// Prepared statements currently cached.
    pub prepared_statements_count: Gauge,
    /// Prepared statements evicted from the cache.
    pub prepared_statements_evicted: Counter,
    /// Prepared statements executed.
    pub prepared_statements_executed: Counter,
    /// Regular, non-prepared statements executed.
    pub regular_statements_executed: Counter,
    /// Ratio of prepared to total statements.
    pub prepared_statements_ratio: FloatGauge,
}

/// Statistics for one named Cassandra thread pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPoolStats {
    /// Name of the thread pool.
    pub pool_name: String,
    /// Tasks being actively worked.
    pub active_tasks: Gauge,
    /// Tasks queued for execution.
    pub pending_tasks: Gauge,
    /// Tasks completed since startup.
    pub completed_tasks: Counter,
    /// Tasks that have ever blocked on a full queue.
    pub total_blocked_tasks: Counter,
    /// Tasks currently blocked on a full queue.
    pub currently_blocked_tasks: Counter,
    /// Configured maximum pool size.
    pub max_pool_size: Gauge,
}

/// Compaction statistics, cluster-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Bytes compacted since startup.
    pub bytes_compacted: Counter,
    /// Compaction tasks queued.
    pub pending_tasks: Gauge,
    /// Compaction tasks completed since startup.
    pub completed_tasks: Counter,
}

/// Coordinator-level statistics for one client request type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRequestStats {
    /// The request type, e.g. `Read` or `Write`.
    pub request_type: String,
    /// End-to-end request latency.
    pub request_latency: Latency,
    /// Requests that timed out.
    pub timeouts: Counter,
    /// Requests that failed.
    pub failures: Counter,
    /// Requests rejected for lack of available replicas.
    pub unavailables: Counter,
}

/// Memory usage of the monitored Java process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Heap memory in use.
    pub heap_used: BytesGauge,
    /// Off-heap memory in use.
    pub nonheap_used: BytesGauge,
}

/// Statistics for one garbage collector of the monitored process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Name of the collector.
    pub name: String,
    /// Collections performed since startup.
    pub count: Counter,
    /// Duration of the most recent collection.
    pub last_gc: Duration,
    /// Time spent collecting since startup.
    pub accumulated: Duration,
}

/// Storage topology of the cluster as seen by the monitored node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keyspaces.
    pub keyspace_count: Counter,
    /// Number of tokens owned.
    pub token_count: Counter,
    /// Addresses of live nodes.
    pub live_nodes: Vec<String>,
    /// Addresses of unreachable nodes.
    pub unreachable_nodes: Vec<String>,
    /// Addresses of nodes joining the ring.
    pub joining_nodes: Vec<String>,
    /// Addresses of nodes moving tokens.
    pub moving_nodes: Vec<String>,
    /// Addresses of nodes leaving the ring.
    pub leaving_nodes: Vec<String>,
}

/// Hint delivery and internal exception statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCoreStats {
    /// Hints currently being delivered.
    pub total_hints_in_progress: Gauge,
    /// Hints written since startup.
    pub total_hints: Counter,
    /// Internal exceptions raised since startup.
    pub internal_exceptions: Counter,
}
