//! Prometheus text exposition of a published [`Snapshot`].
//!
//! Rendering reads the snapshot only, never the bridge, so `/metrics` stays
//! cheap and answers even when the monitored node is misbehaving. Metric
//! descriptors live in fixed tables; per-table metrics are driven by
//! accessor tables so that adding a column means adding one row.
//!
//! Histograms and timers render as Prometheus summaries: the four
//! percentile samples plus `_sum` and `_count`, where `_sum` is the mean
//! multiplied by the count. Timer values are expressed in seconds. A group
//! absent from the snapshot emits nothing at all.

use std::fmt::Write;
use std::time::UNIX_EPOCH;

use crate::jolokia::model::{Histogram, Latency, TableStats};
use crate::scraper::Snapshot;

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy)]
enum Kind {
    Gauge,
    Counter,
    Summary,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Gauge => "gauge",
            Kind::Counter => "counter",
            Kind::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Desc {
    name: &'static str,
    help: &'static str,
    kind: Kind,
}

const fn gauge(name: &'static str, help: &'static str) -> Desc {
    Desc {
        name,
        help,
        kind: Kind::Gauge,
    }
}

const fn counter(name: &'static str, help: &'static str) -> Desc {
    Desc {
        name,
        help,
        kind: Kind::Counter,
    }
}

const fn summary(name: &'static str, help: &'static str) -> Desc {
    Desc {
        name,
        help,
        kind: Kind::Summary,
    }
}

const SCRAPE_TIMESTAMP: Desc = gauge(
    "casstat_last_scrape_timestamp",
    "Timestamp of the last scrape",
);
const SCRAPE_DURATION: Desc = gauge(
    "casstat_last_scrape_duration",
    "Duration of the last scrape in seconds",
);

static TABLE_LATENCIES: [(Desc, fn(&TableStats) -> Latency); 8] = [
    (
        summary(
            "casstat_table_coordinator_read_latency_seconds",
            "Read latency at the coordinator",
        ),
        |t| t.coordinator_read,
    ),
    (
        summary(
            "casstat_table_coordinator_write_latency_seconds",
            "Write latency at the coordinator",
        ),
        |t| t.coordinator_write,
    ),
    (
        summary(
            "casstat_table_coordinator_scan_latency_seconds",
            "Scan latency at the coordinator",
        ),
        |t| t.coordinator_scan,
    ),
    (
        summary(
            "casstat_table_read_latency_seconds",
            "Local read latency",
        ),
        |t| t.read_latency,
    ),
    (
        summary(
            "casstat_table_write_latency_seconds",
            "Local write latency",
        ),
        |t| t.write_latency,
    ),
    (
        summary(
            "casstat_table_range_latency_seconds",
            "Local range scan latency",
        ),
        |t| t.range_latency,
    ),
    (
        summary(
            "casstat_table_cas_propose_latency_seconds",
            "CAS propose phase latency",
        ),
        |t| t.cas_propose_latency,
    ),
    (
        summary(
            "casstat_table_cas_commit_latency_seconds",
            "CAS commit phase latency",
        ),
        |t| t.cas_commit_latency,
    ),
];

static TABLE_GAUGES: [(Desc, fn(&TableStats) -> f64); 10] = [
    (
        gauge(
            "casstat_table_estimated_partitions",
            "Estimated number of partitions",
        ),
        |t| t.estimated_partition_count as f64,
    ),
    (
        gauge(
            "casstat_table_pending_compactions",
            "Number of pending compactions",
        ),
        |t| t.pending_compactions as f64,
    ),
    (
        gauge(
            "casstat_table_live_disk_space_used_bytes",
            "Disk space used by live SSTables",
        ),
        |t| t.live_disk_space_used as f64,
    ),
    (
        gauge(
            "casstat_table_total_disk_space_used_bytes",
            "Disk space used by all SSTables",
        ),
        |t| t.total_disk_space_used as f64,
    ),
    (
        gauge("casstat_table_live_sstables", "Number of live SSTables"),
        |t| t.live_sstables as f64,
    ),
    (
        gauge(
            "casstat_table_max_partition_size_bytes",
            "Size of the largest partition",
        ),
        |t| t.max_partition_size as f64,
    ),
    (
        gauge(
            "casstat_table_mean_partition_size_bytes",
            "Mean partition size",
        ),
        |t| t.mean_partition_size as f64,
    ),
    (
        gauge(
            "casstat_table_bloom_filter_false_ratio",
            "False positive ratio of the bloom filter",
        ),
        |t| t.bloom_filter_false_ratio,
    ),
    (
        gauge("casstat_table_key_cache_hit_rate", "Key cache hit rate"),
        |t| t.key_cache_hit_rate,
    ),
    (
        gauge(
            "casstat_table_percent_repaired",
            "Percentage of data repaired",
        ),
        |t| t.percent_repaired,
    ),
];

static TABLE_HISTOGRAMS: [(Desc, fn(&TableStats) -> Histogram); 3] = [
    (
        summary(
            "casstat_table_sstables_per_read",
            "SSTables touched per read",
        ),
        |t| t.sstables_per_read,
    ),
    (
        summary(
            "casstat_table_tombstones_scanned",
            "Tombstones scanned per read",
        ),
        |t| t.tombstones_scanned,
    ),
    (
        summary(
            "casstat_table_live_cells_scanned",
            "Live cells scanned per read",
        ),
        |t| t.live_cells_scanned,
    ),
];

static TABLE_COUNTERS: [(Desc, fn(&TableStats) -> u64); 2] = [
    (
        counter(
            "casstat_table_speculative_retries_total",
            "Speculative retries issued",
        ),
        |t| t.speculative_retries,
    ),
    (
        counter(
            "casstat_table_speculative_failed_retries_total",
            "Speculative retries that failed",
        ),
        |t| t.speculative_failed_retries,
    ),
];

/// Render `snapshot` to the Prometheus text exposition format.
#[must_use]
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = Exposition::default();

    out.header(&SCRAPE_TIMESTAMP);
    out.sample(
        SCRAPE_TIMESTAMP.name,
        &[],
        snapshot
            .scrape_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    out.header(&SCRAPE_DURATION);
    out.sample(
        SCRAPE_DURATION.name,
        &[],
        snapshot.scrape_duration.as_secs_f64(),
    );

    render_tables(&mut out, snapshot);
    render_cql(&mut out, snapshot);
    render_thread_pools(&mut out, snapshot);
    render_compaction(&mut out, snapshot);
    render_client_requests(&mut out, snapshot);
    render_node(&mut out, snapshot);
    render_storage(&mut out, snapshot);

    out.buf
}

fn render_tables(out: &mut Exposition, snapshot: &Snapshot) {
    // Samples of one metric must be contiguous in the exposition, so the
    // outer loop is over metrics, not tables.
    for (desc, accessor) in &TABLE_LATENCIES {
        out.header(desc);
        for stats in &snapshot.table_stats {
            out.latency_summary(desc.name, &table_labels(stats), accessor(stats));
        }
    }
    for (desc, accessor) in &TABLE_GAUGES {
        out.header(desc);
        for stats in &snapshot.table_stats {
            out.sample(desc.name, &table_labels(stats), accessor(stats));
        }
    }
    for (desc, accessor) in &TABLE_HISTOGRAMS {
        out.header(desc);
        for stats in &snapshot.table_stats {
            out.histogram_summary(desc.name, &table_labels(stats), accessor(stats));
        }
    }
    for (desc, accessor) in &TABLE_COUNTERS {
        out.header(desc);
        for stats in &snapshot.table_stats {
            out.sample(desc.name, &table_labels(stats), accessor(stats) as f64);
        }
    }
}

fn table_labels(stats: &TableStats) -> [(&'static str, &str); 2] {
    [
        ("keyspace", stats.table.keyspace.as_str()),
        ("table", stats.table.table.as_str()),
    ]
}

fn render_cql(out: &mut Exposition, snapshot: &Snapshot) {
    let Some(cql) = &snapshot.cql else { return };

    out.single(
        &gauge(
            "casstat_cql_prepared_statements_cached",
            "Prepared statements currently cached",
        ),
        cql.prepared_statements_count as f64,
    );
    out.single(
        &counter(
            "casstat_cql_prepared_statements_evicted_total",
            "Prepared statements evicted from the cache",
        ),
        cql.prepared_statements_evicted as f64,
    );
    out.single(
        &counter(
            "casstat_cql_prepared_statements_executed_total",
            "Prepared statements executed",
        ),
        cql.prepared_statements_executed as f64,
    );
    out.single(
        &counter(
            "casstat_cql_regular_statements_executed_total",
            "Regular statements executed",
        ),
        cql.regular_statements_executed as f64,
    );
    out.single(
        &gauge(
            "casstat_cql_prepared_statements_ratio",
            "Ratio of prepared to total statements",
        ),
        cql.prepared_statements_ratio,
    );
}

fn render_thread_pools(out: &mut Exposition, snapshot: &Snapshot) {
    let Some(pools) = &snapshot.thread_pools else { return };

    let columns: [(Desc, fn(&crate::jolokia::model::ThreadPoolStats) -> f64); 6] = [
        (
            gauge("casstat_thread_pool_active_tasks", "Tasks being worked"),
            |p| p.active_tasks as f64,
        ),
        (
            gauge("casstat_thread_pool_pending_tasks", "Tasks queued"),
            |p| p.pending_tasks as f64,
        ),
        (
            counter(
                "casstat_thread_pool_completed_tasks_total",
                "Tasks completed",
            ),
            |p| p.completed_tasks as f64,
        ),
        (
            counter(
                "casstat_thread_pool_blocked_tasks_total",
                "Tasks that have ever blocked on a full queue",
            ),
            |p| p.total_blocked_tasks as f64,
        ),
        (
            gauge(
                "casstat_thread_pool_currently_blocked_tasks",
                "Tasks currently blocked on a full queue",
            ),
            |p| p.currently_blocked_tasks as f64,
        ),
        (
            gauge(
                "casstat_thread_pool_max_pool_size",
                "Configured maximum pool size",
            ),
            |p| p.max_pool_size as f64,
        ),
    ];

    for (desc, accessor) in &columns {
        out.header(desc);
        for pool in pools {
            out.sample(desc.name, &[("pool", pool.pool_name.as_str())], accessor(pool));
        }
    }
}

fn render_compaction(out: &mut Exposition, snapshot: &Snapshot) {
    let Some(compaction) = &snapshot.compaction else { return };

    out.single(
        &counter(
            "casstat_compaction_bytes_compacted_total",
            "Bytes compacted",
        ),
        compaction.bytes_compacted as f64,
    );
    out.single(
        &gauge(
            "casstat_compaction_pending_tasks",
            "Compaction tasks queued",
        ),
        compaction.pending_tasks as f64,
    );
    out.single(
        &counter(
            "casstat_compaction_completed_tasks_total",
            "Compaction tasks completed",
        ),
        compaction.completed_tasks as f64,
    );
}

fn render_client_requests(out: &mut Exposition, snapshot: &Snapshot) {
    let Some(requests) = &snapshot.client_requests else { return };

    let latency = summary(
        "casstat_client_request_latency_seconds",
        "End to end client request latency",
    );
    out.header(&latency);
    for request in requests {
        out.latency_summary(
            latency.name,
            &[("request_type", request.request_type.as_str())],
            request.request_latency,
        );
    }

    let columns: [(Desc, fn(&crate::jolokia::model::ClientRequestStats) -> f64); 3] = [
        (
            counter(
                "casstat_client_request_timeouts_total",
                "Client requests that timed out",
            ),
            |r| r.timeouts as f64,
        ),
        (
            counter(
                "casstat_client_request_failures_total",
                "Client requests that failed",
            ),
            |r| r.failures as f64,
        ),
        (
            counter(
                "casstat_client_request_unavailables_total",
                "Client requests rejected for lack of replicas",
            ),
            |r| r.unavailables as f64,
        ),
    ];
    for (desc, accessor) in &columns {
        out.header(desc);
        for request in requests {
            out.sample(
                desc.name,
                &[("request_type", request.request_type.as_str())],
                accessor(request),
            );
        }
    }
}

fn render_node(out: &mut Exposition, snapshot: &Snapshot) {
    if let Some(connected) = snapshot.connected_clients {
        out.single(
            &gauge(
                "casstat_connected_clients",
                "Clients connected over the native protocol",
            ),
            connected as f64,
        );
    }

    if let Some(memory) = &snapshot.memory {
        out.single(
            &gauge(
                "casstat_memory_heap_used_bytes",
                "Bytes representing the used memory heap size",
            ),
            memory.heap_used as f64,
        );
        out.single(
            &gauge(
                "casstat_memory_nonheap_used_bytes",
                "Bytes representing the used memory non-heap size",
            ),
            memory.nonheap_used as f64,
        );
    }

    if let Some(gc) = &snapshot.gc {
        let count = counter("casstat_gc_total", "Total number of garbage collections");
        out.header(&count);
        for stat in gc {
            out.sample(count.name, &[("name", stat.name.as_str())], stat.count as f64);
        }

        let last = gauge(
            "casstat_gc_last_duration_seconds",
            "Duration of the last garbage collection",
        );
        out.header(&last);
        for stat in gc {
            out.sample(
                last.name,
                &[("name", stat.name.as_str())],
                stat.last_gc.as_secs_f64(),
            );
        }

        let accumulated = counter(
            "casstat_gc_accumulated_duration_seconds",
            "Accumulated duration of garbage collections",
        );
        out.header(&accumulated);
        for stat in gc {
            out.sample(
                accumulated.name,
                &[("name", stat.name.as_str())],
                stat.accumulated.as_secs_f64(),
            );
        }
    }
}

fn render_storage(out: &mut Exposition, snapshot: &Snapshot) {
    if let Some(storage) = &snapshot.storage {
        out.single(
            &gauge("casstat_storage_keyspaces", "Number of keyspaces"),
            storage.keyspace_count as f64,
        );
        out.single(
            &gauge("casstat_storage_tokens", "Number of tokens owned"),
            storage.token_count as f64,
        );

        let node = gauge(
            "casstat_storage_node",
            "Cluster nodes by ring status, one series per node",
        );
        out.header(&node);
        let rings: [(&str, &[String]); 5] = [
            ("live", &storage.live_nodes),
            ("unreachable", &storage.unreachable_nodes),
            ("joining", &storage.joining_nodes),
            ("moving", &storage.moving_nodes),
            ("leaving", &storage.leaving_nodes),
        ];
        for (status, nodes) in rings {
            for address in nodes {
                out.sample(
                    node.name,
                    &[("node", address.as_str()), ("status", status)],
                    1.0,
                );
            }
        }
    }

    if let Some(core) = &snapshot.storage_core {
        out.single(
            &gauge(
                "casstat_storage_hints_in_progress",
                "Hints currently being delivered",
            ),
            core.total_hints_in_progress as f64,
        );
        out.single(
            &counter("casstat_storage_hints_total", "Hints written"),
            core.total_hints as f64,
        );
        out.single(
            &counter(
                "casstat_storage_internal_exceptions_total",
                "Internal exceptions raised",
            ),
            core.internal_exceptions as f64,
        );
    }
}

/// Accumulates exposition text. Formatting into a `String` cannot fail, so
/// write errors are ignored throughout.
#[derive(Debug, Default)]
struct Exposition {
    buf: String,
}

impl Exposition {
    fn header(&mut self, desc: &Desc) {
        let _ = writeln!(self.buf, "# HELP {} {}", desc.name, desc.help);
        let _ = writeln!(self.buf, "# TYPE {} {}", desc.name, desc.kind.as_str());
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: f64) {
        let _ = writeln!(
            self.buf,
            "{name}{labels} {value}",
            labels = format_labels(labels),
            value = format_value(value),
        );
    }

    /// Header plus one unlabelled sample, for singleton metrics.
    fn single(&mut self, desc: &Desc, value: f64) {
        self.header(desc);
        self.sample(desc.name, &[], value);
    }

    fn latency_summary(&mut self, name: &str, labels: &[(&str, &str)], latency: Latency) {
        self.quantiles(
            name,
            labels,
            [
                ("0.75", latency.p75.as_secs_f64()),
                ("0.95", latency.p95.as_secs_f64()),
                ("0.99", latency.p99.as_secs_f64()),
                ("0.999", latency.p999.as_secs_f64()),
            ],
            latency.mean.as_secs_f64(),
            latency.count,
        );
    }

    fn histogram_summary(&mut self, name: &str, labels: &[(&str, &str)], histogram: Histogram) {
        self.quantiles(
            name,
            labels,
            [
                ("0.75", histogram.p75),
                ("0.95", histogram.p95),
                ("0.99", histogram.p99),
                ("0.999", histogram.p999),
            ],
            histogram.mean,
            histogram.count,
        );
    }

    fn quantiles(
        &mut self,
        name: &str,
        labels: &[(&str, &str)],
        quantiles: [(&str, f64); 4],
        mean: f64,
        count: u64,
    ) {
        for (quantile, value) in quantiles {
            let mut labelled: Vec<(&str, &str)> = labels.to_vec();
            labelled.push(("quantile", quantile));
            self.sample(name, &labelled, value);
        }
        // The JMX payload carries a mean rather than a running sum, so the
        // sum is reconstructed from mean and count.
        let sum = format!("{name}_sum");
        self.sample(&sum, labels, mean * count as f64);
        let count_name = format!("{name}_count");
        self.sample(&count_name, labels, count as f64);
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jolokia::model::{
        CqlStats, GcStats, MemoryStats, StorageStats, Table, TableStats,
    };
    use std::time::{Duration, SystemTime};

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            table_stats: Vec::new(),
            cql: None,
            thread_pools: None,
            compaction: None,
            client_requests: None,
            connected_clients: None,
            memory: None,
            gc: None,
            storage: None,
            storage_core: None,
            scrape_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            scrape_duration: Duration::from_millis(250),
        }
    }

    fn table_stats(keyspace: &str, table: &str) -> TableStats {
        TableStats {
            table: Table {
                keyspace: keyspace.to_string(),
                table: table.to_string(),
            },
            read_latency: Latency {
                p75: Duration::from_micros(10),
                p95: Duration::from_micros(20),
                p99: Duration::from_micros(50),
                p999: Duration::from_micros(90),
                mean: Duration::from_micros(15),
                count: 4,
                ..Latency::default()
            },
            live_sstables: 7,
            ..TableStats::default()
        }
    }

    #[test]
    fn scrape_timing_always_renders() {
        let text = render(&empty_snapshot());
        assert!(text.contains("# TYPE casstat_last_scrape_timestamp gauge"));
        assert!(text.contains("casstat_last_scrape_timestamp 1700000000"));
        assert!(text.contains("casstat_last_scrape_duration 0.25"));
    }

    #[test]
    fn absent_groups_emit_nothing() {
        let text = render(&empty_snapshot());
        assert!(!text.contains("casstat_cql"));
        assert!(!text.contains("casstat_memory"));
        assert!(!text.contains("casstat_gc"));
        assert!(!text.contains("casstat_storage"));
        assert!(!text.contains("casstat_table_read_latency_seconds{"));
    }

    #[test]
    fn table_latencies_render_as_summaries_in_seconds() {
        let mut snapshot = empty_snapshot();
        snapshot.table_stats = vec![table_stats("app", "events")];

        let text = render(&snapshot);
        assert!(text.contains("# TYPE casstat_table_read_latency_seconds summary"));
        assert!(text.contains(
            "casstat_table_read_latency_seconds{keyspace=\"app\",table=\"events\",quantile=\"0.99\"} 0.00005"
        ));
        assert!(text.contains(
            "casstat_table_read_latency_seconds_sum{keyspace=\"app\",table=\"events\"} 0.00006"
        ));
        assert!(text.contains(
            "casstat_table_read_latency_seconds_count{keyspace=\"app\",table=\"events\"} 4"
        ));
        assert!(text.contains(
            "casstat_table_live_sstables{keyspace=\"app\",table=\"events\"} 7"
        ));
    }

    #[test]
    fn headers_appear_once_per_metric_across_tables() {
        let mut snapshot = empty_snapshot();
        snapshot.table_stats = vec![table_stats("a", "x"), table_stats("b", "y")];

        let text = render(&snapshot);
        let headers = text
            .matches("# TYPE casstat_table_live_sstables gauge")
            .count();
        assert_eq!(headers, 1);
        let samples = text
            .lines()
            .filter(|line| line.starts_with("casstat_table_live_sstables{"))
            .count();
        assert_eq!(samples, 2);
    }

    #[test]
    fn present_groups_render_their_series() {
        let mut snapshot = empty_snapshot();
        snapshot.cql = Some(CqlStats {
            prepared_statements_count: 12,
            prepared_statements_ratio: 0.75,
            ..CqlStats::default()
        });
        snapshot.memory = Some(MemoryStats {
            heap_used: 1024,
            nonheap_used: 512,
        });
        snapshot.gc = Some(vec![GcStats {
            name: "G1 Young Generation".to_string(),
            count: 5,
            last_gc: Duration::from_millis(30),
            accumulated: Duration::from_millis(150),
        }]);

        let text = render(&snapshot);
        assert!(text.contains("casstat_cql_prepared_statements_cached 12"));
        assert!(text.contains("casstat_cql_prepared_statements_ratio 0.75"));
        assert!(text.contains("casstat_memory_heap_used_bytes 1024"));
        assert!(text.contains("casstat_gc_total{name=\"G1 Young Generation\"} 5"));
        assert!(text.contains(
            "casstat_gc_last_duration_seconds{name=\"G1 Young Generation\"} 0.03"
        ));
    }

    #[test]
    fn storage_nodes_render_one_series_per_node() {
        let mut snapshot = empty_snapshot();
        snapshot.storage = Some(StorageStats {
            keyspace_count: 3,
            token_count: 256,
            live_nodes: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            unreachable_nodes: vec!["10.0.0.3".to_string()],
            ..StorageStats::default()
        });

        let text = render(&snapshot);
        assert!(text.contains("casstat_storage_keyspaces 3"));
        assert!(text.contains("casstat_storage_tokens 256"));
        assert!(text.contains("casstat_storage_node{node=\"10.0.0.1\",status=\"live\"} 1"));
        assert!(text.contains("casstat_storage_node{node=\"10.0.0.3\",status=\"unreachable\"} 1"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn non_finite_values_use_prometheus_spelling() {
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
