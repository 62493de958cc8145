//! Client for the Jolokia JMX-over-HTTP bridge.
//!
//! Jolokia exposes the JMX beans of the Cassandra process it runs alongside
//! as JSON over HTTP. This module speaks that protocol: single reads via
//! `GET /jolokia/read/<bean>`, bulk reads via `POST /jolokia/read`, and the
//! `GET /jolokia/version` liveness probe. Responses are decoded into the
//! typed taxonomy in [`model`].

pub mod bean;
pub mod model;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::model::{
    ClientRequestStats, CompactionStats, CqlStats, Gauge, GcStats, MemoryStats, StorageCoreStats,
    StorageStats, Table, TableStats, ThreadPoolStats,
};

/// The domain under which Cassandra publishes its metrics beans.
const METRICS_DOMAIN: &str = "org.apache.cassandra.metrics";

/// The domain for storage service management beans.
const DB_DOMAIN: &str = "org.apache.cassandra.db";

/// The domain for JVM platform beans.
const JAVA_DOMAIN: &str = "java.lang";

/// The embedded status Jolokia reports on success.
const JOLOKIA_OK: u16 = 200;

/// The per-table attributes fetched in one bulk request. Enumerated
/// explicitly because a wildcard read of a table bean also returns
/// per-table compaction metrics, which are expensive to compute and
/// covered elsewhere.
const TABLE_METRICS: [&str; 23] = [
    "CoordinatorReadLatency",
    "CoordinatorWriteLatency",
    "CoordinatorScanLatency",
    "ReadLatency",
    "WriteLatency",
    "RangeLatency",
    "CasProposeLatency",
    "CasCommitLatency",
    "EstimatedPartitionCount",
    "PendingCompactions",
    "LiveDiskSpaceUsed",
    "TotalDiskSpaceUsed",
    "LiveSSTableCount",
    "SSTablesPerReadHistogram",
    "MaxPartitionSize",
    "MeanPartitionSize",
    "BloomFilterFalseRatio",
    "TombstoneScannedHistogram",
    "LiveScannedHistogram",
    "KeyCacheHitRate",
    "PercentRepaired",
    "SpeculativeRetries",
    "SpeculativeFailedRetries",
];

/// Errors produced by [`Client`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP round trip failed outright: connection, DNS or timeout.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The bridge answered with a non-success HTTP status.
    #[error("expected 200 OK, got {0}")]
    Http(reqwest::StatusCode),
    /// The HTTP layer reported success but the status embedded in the
    /// Jolokia response did not.
    #[error("expected 200 response from Jolokia, got {0}")]
    Jolokia(u16),
    /// The response body was not well-formed JSON of the expected shape.
    #[error("error whilst decoding: {0}")]
    Decode(#[from] serde_json::Error),
    /// A bulk request was constructed with a non-empty attribute filter
    /// list whose length differs from the query list. Never sent.
    #[error("expected {queries} attribute groups to match {queries} queries, got {filters}")]
    MismatchedBulkRequest {
        /// Number of bean queries in the request.
        queries: usize,
        /// Number of attribute filter groups supplied.
        filters: usize,
    },
}

/// The capability set the scrape coordinator consumes. Every operation is
/// independently failable and none retry internally; the scrape timer is
/// the only retry mechanism.
pub trait MetricSource {
    /// Cheap liveness probe returning the running Jolokia agent version.
    fn version(&self) -> impl Future<Output = Result<String, Error>> + Send;

    /// The set of tables currently observable through table-scoped beans.
    fn tables(&self) -> impl Future<Output = Result<Vec<Table>, Error>> + Send;

    /// All per-table statistics for one table.
    fn table_stats(&self, table: Table)
    -> impl Future<Output = Result<TableStats, Error>> + Send;

    /// CQL statement statistics.
    fn cql_stats(&self) -> impl Future<Output = Result<CqlStats, Error>> + Send;

    /// Statistics for every named thread pool, sorted by pool name.
    fn thread_pool_stats(
        &self,
    ) -> impl Future<Output = Result<Vec<ThreadPoolStats>, Error>> + Send;

    /// Cluster-wide compaction statistics.
    fn compaction_stats(&self) -> impl Future<Output = Result<CompactionStats, Error>> + Send;

    /// Coordinator-level client request statistics, sorted by request type.
    fn client_request_stats(
        &self,
    ) -> impl Future<Output = Result<Vec<ClientRequestStats>, Error>> + Send;

    /// Number of clients connected over the native protocol.
    fn connected_clients(&self) -> impl Future<Output = Result<Gauge, Error>> + Send;

    /// Heap and off-heap memory usage of the Java process.
    fn memory_stats(&self) -> impl Future<Output = Result<MemoryStats, Error>> + Send;

    /// Garbage collection statistics, one record per collector, sorted by
    /// collector name.
    fn gc_stats(&self) -> impl Future<Output = Result<Vec<GcStats>, Error>> + Send;

    /// Storage topology: keyspace and token counts plus node lists by state.
    fn storage_stats(&self) -> impl Future<Output = Result<StorageStats, Error>> + Send;

    /// Hint delivery and internal exception statistics.
    fn storage_core_stats(
        &self,
    ) -> impl Future<Output = Result<StorageCoreStats, Error>> + Send;
}

/// One query of a Jolokia bulk read request.
#[derive(Debug, Serialize)]
struct BulkQuery {
    #[serde(rename = "type")]
    kind: &'static str,
    mbean: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribute: Option<Vec<String>>,
}

/// The echo of the query a bulk response item answers.
#[derive(Debug, Default, Deserialize)]
struct BulkRequestEcho {
    #[serde(default)]
    mbean: String,
}

/// One item of a Jolokia bulk read response. Items arrive in request order
/// but are matched back by the echoed bean name, not by position.
#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    request: BulkRequestEcho,
    #[serde(default)]
    value: Value,
}

/// A client for one Jolokia endpoint.
#[derive(Debug)]
pub struct Client {
    endpoint: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`] for the given endpoint, which should be of
    /// the form `<protocol>://<host>:<port>`, e.g. `http://localhost:8778`.
    /// Every request the client issues is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// GET `path` and decode the body, checking both the HTTP status and
    /// the status Jolokia embeds in the response body. The two disagree
    /// whenever the bridge is up but the bean read failed.
    async fn get_json(&self, path: &str) -> Result<Value, Error> {
        let url = format!("{endpoint}{path}", endpoint = self.endpoint);
        let rsp = self.http.get(&url).send().await?;
        if !rsp.status().is_success() {
            return Err(Error::Http(rsp.status()));
        }

        let body = rsp.text().await?;
        let value: Value = serde_json::from_str(&body)?;

        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        if status != u64::from(JOLOKIA_OK) {
            return Err(Error::Jolokia(u16::try_from(status).unwrap_or(u16::MAX)));
        }
        Ok(value)
    }

    /// GET a single bean read, `domain:kv1,kv2,...`.
    async fn read(&self, domain: &str, kv: &[&str]) -> Result<Value, Error> {
        let path = if kv.is_empty() {
            format!("/jolokia/read/{domain}")
        } else {
            format!("/jolokia/read/{domain}:{tags}", tags = kv.join(","))
        };
        self.get_json(&path).await
    }

    /// POST a bulk read of several beans in one round trip. `filters`
    /// restricts each query to an explicit attribute subset; it must be
    /// empty, requesting all attributes, or have one entry per query.
    async fn bulk_read(
        &self,
        domain: &str,
        queries: &[Vec<String>],
        filters: &[Vec<String>],
    ) -> Result<Vec<BulkItem>, Error> {
        let body = build_bulk_queries(domain, queries, filters)?;
        let url = format!("{endpoint}/jolokia/read", endpoint = self.endpoint);
        let rsp = self.http.post(&url).json(&body).send().await?;
        if !rsp.status().is_success() {
            return Err(Error::Http(rsp.status()));
        }

        let body = rsp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Build the JSON body of a bulk read request.
fn build_bulk_queries(
    domain: &str,
    queries: &[Vec<String>],
    filters: &[Vec<String>],
) -> Result<Vec<BulkQuery>, Error> {
    if !filters.is_empty() && filters.len() != queries.len() {
        return Err(Error::MismatchedBulkRequest {
            queries: queries.len(),
            filters: filters.len(),
        });
    }

    Ok(queries
        .iter()
        .enumerate()
        .map(|(idx, tags)| BulkQuery {
            kind: "read",
            mbean: format!("{domain}:{tags}", tags = tags.join(",")),
            attribute: filters
                .get(idx)
                .filter(|attrs| !attrs.is_empty())
                .cloned(),
        })
        .collect())
}

impl MetricSource for Client {
    async fn version(&self) -> Result<String, Error> {
        let rsp = self.get_json("/jolokia/version").await?;
        Ok(rsp
            .pointer("/value/agent")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn tables(&self) -> Result<Vec<Table>, Error> {
        // One representative attribute keeps this cheap: a wildcard over all
        // table metrics takes a long time on a large catalog.
        let rsp = self
            .read(
                METRICS_DOMAIN,
                &["type=Table", "name=LiveDiskSpaceUsed", "*"],
            )
            .await?;

        let mut tables = Vec::new();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for name in beans.keys() {
                let attrs = bean::extract_attributes(name);
                // JMX exposes the table name as scope.
                let keyspace = attrs.get("keyspace").map_or("", String::as_str);
                let table = attrs.get("scope").map_or("", String::as_str);
                let kind = attrs.get("type").map_or("", String::as_str);

                if kind == "Table" && !keyspace.is_empty() && !table.is_empty() {
                    tables.push(Table {
                        keyspace: keyspace.to_string(),
                        table: table.to_string(),
                    });
                }
            }
        }
        Ok(tables)
    }

    async fn table_stats(&self, table: Table) -> Result<TableStats, Error> {
        let queries: Vec<Vec<String>> = TABLE_METRICS
            .iter()
            .map(|name| {
                vec![
                    "type=Table".to_string(),
                    format!("keyspace={keyspace}", keyspace = table.keyspace),
                    format!("scope={table}", table = table.table),
                    format!("name={name}"),
                ]
            })
            .collect();

        let items = self.bulk_read(METRICS_DOMAIN, &queries, &[]).await?;

        let mut stats = TableStats {
            table,
            ..TableStats::default()
        };
        for item in items {
            if item.status != JOLOKIA_OK {
                continue;
            }

            let attrs = bean::extract_attributes(&item.request.mbean);
            let value = &item.value;
            match attrs.get("name").map_or("", String::as_str) {
                "CoordinatorReadLatency" => stats.coordinator_read = bean::parse_latency(value)?,
                "CoordinatorWriteLatency" => {
                    stats.coordinator_write = bean::parse_latency(value)?;
                }
                "CoordinatorScanLatency" => stats.coordinator_scan = bean::parse_latency(value)?,
                "ReadLatency" => stats.read_latency = bean::parse_latency(value)?,
                "WriteLatency" => stats.write_latency = bean::parse_latency(value)?,
                "RangeLatency" => stats.range_latency = bean::parse_latency(value)?,
                "CasProposeLatency" => stats.cas_propose_latency = bean::parse_latency(value)?,
                "CasCommitLatency" => stats.cas_commit_latency = bean::parse_latency(value)?,

                "EstimatedPartitionCount" => {
                    stats.estimated_partition_count = bean::gauge_value(value);
                }
                "PendingCompactions" => stats.pending_compactions = bean::gauge_value(value),
                "LiveDiskSpaceUsed" => stats.live_disk_space_used = bean::gauge_count(value),
                "TotalDiskSpaceUsed" => stats.total_disk_space_used = bean::gauge_count(value),
                "LiveSSTableCount" => stats.live_sstables = bean::gauge_value(value),
                "SSTablesPerReadHistogram" => {
                    stats.sstables_per_read = bean::parse_histogram(value)?;
                }
                "MaxPartitionSize" => stats.max_partition_size = bean::gauge_value(value),
                "MeanPartitionSize" => stats.mean_partition_size = bean::gauge_value(value),
                "BloomFilterFalseRatio" => {
                    stats.bloom_filter_false_ratio = bean::float_value(value);
                }
                "TombstoneScannedHistogram" => {
                    stats.tombstones_scanned = bean::parse_histogram(value)?;
                }
                "LiveScannedHistogram" => {
                    stats.live_cells_scanned = bean::parse_histogram(value)?;
                }
                "KeyCacheHitRate" => stats.key_cache_hit_rate = bean::float_value(value),
                "PercentRepaired" => stats.percent_repaired = bean::float_value(value),
                "SpeculativeRetries" => stats.speculative_retries = bean::counter_count(value),
                "SpeculativeFailedRetries" => {
                    stats.speculative_failed_retries = bean::counter_count(value);
                }
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn cql_stats(&self) -> Result<CqlStats, Error> {
        let rsp = self.read(METRICS_DOMAIN, &["type=CQL", "name=*"]).await?;

        let mut stats = CqlStats::default();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for (name, value) in beans {
                let attrs = bean::extract_attributes(name);
                match attrs.get("name").map_or("", String::as_str) {
                    "PreparedStatementsCount" => {
                        stats.prepared_statements_count = bean::gauge_count(value);
                    }
                    "PreparedStatementsEvicted" => {
                        stats.prepared_statements_evicted = bean::counter_count(value);
                    }
                    "PreparedStatementsExecuted" => {
                        stats.prepared_statements_executed = bean::counter_count(value);
                    }
                    "RegularStatementsExecuted" => {
                        stats.regular_statements_executed = bean::counter_count(value);
                    }
                    "PreparedStatementsRatio" => {
                        stats.prepared_statements_ratio = bean::float_value(value);
                    }
                    _ => {}
                }
            }
        }
        Ok(stats)
    }

    async fn thread_pool_stats(&self) -> Result<Vec<ThreadPoolStats>, Error> {
        let rsp = self.read(METRICS_DOMAIN, &["type=ThreadPools", "*"]).await?;

        // The response is a flat list of stats; a map keyed by pool name
        // groups them and gives deterministic order for free.
        let mut pools: BTreeMap<String, ThreadPoolStats> = BTreeMap::new();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for (name, value) in beans {
                let attrs = bean::extract_attributes(name);
                // The pool name is embedded as scope.
                let pool_name = attrs.get("scope").map_or("", String::as_str);
                let pool = pools
                    .entry(pool_name.to_string())
                    .or_insert_with(|| ThreadPoolStats {
                        pool_name: pool_name.to_string(),
                        ..ThreadPoolStats::default()
                    });

                match attrs.get("name").map_or("", String::as_str) {
                    "ActiveTasks" => pool.active_tasks = bean::gauge_value(value),
                    "PendingTasks" => pool.pending_tasks = bean::gauge_value(value),
                    "CompletedTasks" => pool.completed_tasks = bean::counter_value(value),
                    "TotalBlockedTasks" => pool.total_blocked_tasks = bean::counter_count(value),
                    "CurrentlyBlockedTasks" => {
                        pool.currently_blocked_tasks = bean::counter_count(value);
                    }
                    "MaxPoolSize" => pool.max_pool_size = bean::gauge_value(value),
                    _ => {}
                }
            }
        }
        Ok(pools.into_values().collect())
    }

    async fn compaction_stats(&self) -> Result<CompactionStats, Error> {
        // A bulk read of the three beans we want; a wildcard read would
        // also return per-table compaction metrics, which are expensive.
        let queries: Vec<Vec<String>> = ["BytesCompacted", "PendingTasks", "CompletedTasks"]
            .iter()
            .map(|name| vec!["type=Compaction".to_string(), format!("name={name}")])
            .collect();

        let items = self.bulk_read(METRICS_DOMAIN, &queries, &[]).await?;

        let mut stats = CompactionStats::default();
        for item in items {
            if item.status != JOLOKIA_OK {
                continue;
            }

            let attrs = bean::extract_attributes(&item.request.mbean);
            let value = &item.value;
            match attrs.get("name").map_or("", String::as_str) {
                "BytesCompacted" => stats.bytes_compacted = bean::counter_count(value),
                "PendingTasks" => stats.pending_tasks = bean::gauge_value(value),
                // Monotonically increasing despite being exposed as a value.
                "CompletedTasks" => stats.completed_tasks = bean::counter_value(value),
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn client_request_stats(&self) -> Result<Vec<ClientRequestStats>, Error> {
        let rsp = self
            .read(METRICS_DOMAIN, &["type=ClientRequest", "*"])
            .await?;

        let mut stats: BTreeMap<String, ClientRequestStats> = BTreeMap::new();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for (name, value) in beans {
                let attrs = bean::extract_attributes(name);
                // The request type is embedded as scope.
                let request_type = attrs.get("scope").map_or("", String::as_str);
                let stat = stats
                    .entry(request_type.to_string())
                    .or_insert_with(|| ClientRequestStats {
                        request_type: request_type.to_string(),
                        ..ClientRequestStats::default()
                    });

                match attrs.get("name").map_or("", String::as_str) {
                    "Latency" => stat.request_latency = bean::parse_latency(value)?,
                    "Timeouts" => stat.timeouts = bean::counter_count(value),
                    "Failures" => stat.failures = bean::counter_count(value),
                    "Unavailables" => stat.unavailables = bean::counter_count(value),
                    _ => {}
                }
            }
        }
        Ok(stats.into_values().collect())
    }

    async fn connected_clients(&self) -> Result<Gauge, Error> {
        // Query the one gauge by name; the wildcard form lists every
        // connected client, which can be huge.
        let rsp = self
            .read(METRICS_DOMAIN, &["type=Client", "name=connectedNativeClients"])
            .await?;
        Ok(rsp
            .pointer("/value/Value")
            .and_then(Value::as_i64)
            .unwrap_or_default())
    }

    async fn memory_stats(&self) -> Result<MemoryStats, Error> {
        let rsp = self.read(JAVA_DOMAIN, &["type=Memory/*"]).await?;
        Ok(MemoryStats {
            heap_used: rsp
                .pointer("/value/HeapMemoryUsage/used")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            nonheap_used: rsp
                .pointer("/value/NonHeapMemoryUsage/used")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        })
    }

    async fn gc_stats(&self) -> Result<Vec<GcStats>, Error> {
        let rsp = self.read(JAVA_DOMAIN, &["type=GarbageCollector,*"]).await?;

        let mut stats = Vec::new();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for value in beans.values() {
                let last_gc = value
                    .pointer("/LastGcInfo/duration")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                let accumulated = value
                    .get("CollectionTime")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                stats.push(GcStats {
                    name: value
                        .get("Name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    count: value
                        .get("CollectionCount")
                        .and_then(Value::as_u64)
                        .unwrap_or_default(),
                    last_gc: Duration::from_millis(last_gc),
                    accumulated: Duration::from_millis(accumulated),
                });
            }
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    async fn storage_stats(&self) -> Result<StorageStats, Error> {
        let attributes = [
            "Keyspaces",
            "Tokens",
            "LiveNodes",
            "UnreachableNodes",
            "JoiningNodes",
            "MovingNodes",
            "LeavingNodes",
        ];
        let queries = vec![vec!["type=StorageService".to_string()]];
        let filters = vec![attributes.iter().map(ToString::to_string).collect()];

        let items = self.bulk_read(DB_DOMAIN, &queries, &filters).await?;

        let mut stats = StorageStats::default();
        for item in items {
            if item.status != JOLOKIA_OK {
                continue;
            }

            let value = &item.value;
            stats.keyspace_count = value
                .get("Keyspaces")
                .and_then(Value::as_array)
                .map_or(0, |keyspaces| keyspaces.len() as u64);
            stats.token_count = value
                .get("Tokens")
                .and_then(Value::as_array)
                .map_or(0, |tokens| tokens.len() as u64);
            stats.live_nodes = bean::string_array(value.get("LiveNodes"));
            stats.unreachable_nodes = bean::string_array(value.get("UnreachableNodes"));
            stats.joining_nodes = bean::string_array(value.get("JoiningNodes"));
            stats.moving_nodes = bean::string_array(value.get("MovingNodes"));
            stats.leaving_nodes = bean::string_array(value.get("LeavingNodes"));
        }
        Ok(stats)
    }

    async fn storage_core_stats(&self) -> Result<StorageCoreStats, Error> {
        let rsp = self
            .read(METRICS_DOMAIN, &["type=Storage", "name=*"])
            .await?;

        let mut stats = StorageCoreStats::default();
        if let Some(beans) = rsp.get("value").and_then(Value::as_object) {
            for (name, value) in beans {
                let attrs = bean::extract_attributes(name);
                match attrs.get("name").map_or("", String::as_str) {
                    "TotalHintsInProgress" => {
                        stats.total_hints_in_progress = bean::gauge_count(value);
                    }
                    "TotalHints" => stats.total_hints = bean::counter_count(value),
                    "Exceptions" => stats.internal_exceptions = bean::counter_count(value),
                    _ => {}
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warp::Filter;

    #[test]
    fn bulk_queries_reject_mismatched_filter_lengths() {
        let queries = vec![
            vec!["type=Compaction".to_string(), "name=BytesCompacted".to_string()],
            vec!["type=Compaction".to_string(), "name=PendingTasks".to_string()],
        ];
        let filters = vec![vec!["Count".to_string()]];

        let err = build_bulk_queries(METRICS_DOMAIN, &queries, &filters)
            .expect_err("mismatched lengths must be rejected");
        assert!(matches!(
            err,
            Error::MismatchedBulkRequest {
                queries: 2,
                filters: 1
            }
        ));
    }

    #[test]
    fn bulk_queries_serialize_to_the_wire_shape() {
        let queries = vec![vec!["type=StorageService".to_string()]];
        let filters = vec![vec!["Keyspaces".to_string(), "Tokens".to_string()]];

        let body = build_bulk_queries(DB_DOMAIN, &queries, &filters)
            .expect("equal lengths must be accepted");
        let encoded = serde_json::to_value(&body).expect("body must serialize");
        assert_eq!(
            encoded,
            json!([{
                "type": "read",
                "mbean": "org.apache.cassandra.db:type=StorageService",
                "attribute": ["Keyspaces", "Tokens"],
            }])
        );
    }

    #[test]
    fn bulk_queries_omit_empty_attribute_filters() {
        let queries = vec![vec!["type=Compaction".to_string()]];

        let body = build_bulk_queries(METRICS_DOMAIN, &queries, &[])
            .expect("empty filters must be accepted");
        let encoded = serde_json::to_value(&body).expect("body must serialize");
        assert_eq!(
            encoded,
            json!([{
                "type": "read",
                "mbean": "org.apache.cassandra.metrics:type=Compaction",
            }])
        );
    }

    /// Serve `version_body` for version probes and `read_body` for every
    /// other GET under /jolokia, binding an ephemeral port.
    fn stub_bridge(
        version_body: Value,
        read_body: Value,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let routes = warp::path("jolokia").and(warp::path::tail()).map(
            move |tail: warp::path::Tail| {
                let body = if tail.as_str() == "version" {
                    version_body.clone()
                } else {
                    read_body.clone()
                };
                warp::reply::json(&body)
            },
        );
        let (addr, serve_fut) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        (addr, tokio::spawn(serve_fut))
    }

    fn client_for(addr: std::net::SocketAddr) -> Client {
        Client::new(&format!("http://{addr}"), Duration::from_secs(1))
            .expect("client must build")
    }

    #[tokio::test]
    async fn version_reads_the_agent_field() {
        let (addr, _server) = stub_bridge(
            json!({"status": 200, "value": {"agent": "1.6.2"}}),
            json!({}),
        );
        let client = client_for(addr);

        let version = client.version().await.expect("probe must succeed");
        assert_eq!(version, "1.6.2");
    }

    #[tokio::test]
    async fn embedded_error_status_is_a_protocol_error() {
        let (addr, _server) = stub_bridge(
            json!({"status": 404, "error": "no such agent"}),
            json!({}),
        );
        let client = client_for(addr);

        let err = client.version().await.expect_err("probe must fail");
        assert!(matches!(err, Error::Jolokia(404)));
    }

    #[tokio::test]
    async fn tables_are_derived_from_bean_tags() {
        let read_body = json!({
            "status": 200,
            "value": {
                "org.apache.cassandra.metrics:keyspace=system,name=LiveDiskSpaceUsed,scope=peers,type=Table": {"Count": 1},
                "org.apache.cassandra.metrics:keyspace=app,name=LiveDiskSpaceUsed,scope=events,type=Table": {"Count": 2},
                // Not table-typed and missing both key fields: excluded.
                "org.apache.cassandra.metrics:name=LiveDiskSpaceUsed,type=Keyspace": {"Count": 3},
            },
        });
        let (addr, _server) = stub_bridge(json!({}), read_body);
        let client = client_for(addr);

        let mut tables = client.tables().await.expect("read must succeed");
        tables.sort();
        assert_eq!(
            tables,
            vec![
                Table {
                    keyspace: "app".to_string(),
                    table: "events".to_string()
                },
                Table {
                    keyspace: "system".to_string(),
                    table: "peers".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn table_stats_match_items_by_bean_tag_and_skip_failures() {
        // Items arrive out of request order and one is non-OK; matching is
        // by the echoed bean name and the failure is skipped, not fatal.
        let bulk_body = json!([
            {
                "status": 200,
                "request": {"mbean": "org.apache.cassandra.metrics:keyspace=app,name=LiveSSTableCount,scope=events,type=Table"},
                "value": {"Value": 12},
            },
            {
                "status": 404,
                "request": {"mbean": "org.apache.cassandra.metrics:keyspace=app,name=PendingCompactions,scope=events,type=Table"},
                "value": {"Value": 99},
            },
            {
                "status": 200,
                "request": {"mbean": "org.apache.cassandra.metrics:keyspace=app,name=ReadLatency,scope=events,type=Table"},
                "value": {
                    "Min": 1.0, "Max": 4.0, "75thPercentile": 2.0,
                    "95thPercentile": 3.0, "99thPercentile": 3.5,
                    "999thPercentile": 3.9, "Mean": 2.5, "Count": 7,
                    "DurationUnit": "microseconds",
                },
            },
        ]);

        let routes = warp::path!("jolokia" / "read")
            .and(warp::post())
            .map(move || warp::reply::json(&bulk_body));
        let (addr, serve_fut) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server = tokio::spawn(serve_fut);

        let client = client_for(addr);
        let table = Table {
            keyspace: "app".to_string(),
            table: "events".to_string(),
        };
        let stats = client
            .table_stats(table.clone())
            .await
            .expect("fetch must succeed");

        assert_eq!(stats.table, table);
        assert_eq!(stats.live_sstables, 12);
        // The non-OK item was skipped, leaving the default.
        assert_eq!(stats.pending_compactions, 0);
        assert_eq!(stats.read_latency.count, 7);
        assert_eq!(stats.read_latency.mean, Duration::from_nanos(2500));
    }

    #[tokio::test]
    async fn http_failure_carries_the_status() {
        let routes = warp::any().map(|| {
            warp::reply::with_status("boom", warp::http::StatusCode::INTERNAL_SERVER_ERROR)
        });
        let (addr, serve_fut) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server = tokio::spawn(serve_fut);

        let client = client_for(addr);
        let err = client.version().await.expect_err("probe must fail");
        assert!(matches!(err, Error::Http(status) if status.as_u16() == 500));
    }

    #[tokio::test]
    async fn thread_pools_are_grouped_and_sorted_by_name() {
        let read_body = json!({
            "status": 200,
            "value": {
                "org.apache.cassandra.metrics:name=ActiveTasks,path=transport,scope=Native-Transport-Requests,type=ThreadPools": {"Value": 3},
                "org.apache.cassandra.metrics:name=PendingTasks,path=transport,scope=Native-Transport-Requests,type=ThreadPools": {"Value": 1},
                "org.apache.cassandra.metrics:name=ActiveTasks,path=internal,scope=CompactionExecutor,type=ThreadPools": {"Value": 2},
            },
        });
        let (addr, _server) = stub_bridge(json!({}), read_body);
        let client = client_for(addr);

        let pools = client
            .thread_pool_stats()
            .await
            .expect("read must succeed");
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].pool_name, "CompactionExecutor");
        assert_eq!(pools[0].active_tasks, 2);
        assert_eq!(pools[1].pool_name, "Native-Transport-Requests");
        assert_eq!(pools[1].active_tasks, 3);
        assert_eq!(pools[1].pending_tasks, 1);
    }
}
