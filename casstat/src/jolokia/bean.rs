//! Decoding helpers for Jolokia bean names and payloads.
//!
//! Jolokia returns Cassandra metrics as a flat namespace keyed by bean name,
//! e.g. `org.apache.cassandra.metrics:keyspace=system,name=ReadLatency,
//! scope=local,type=Table`. The helpers here recover the key/value tags from
//! those names and decode the attribute payloads into the typed taxonomy.

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use super::model::{Histogram, Latency};

/// Split a bean name into its key/value tags.
///
/// The domain prefix up to the first `:` is discarded. Each comma-separated
/// segment must contain exactly one `=`; segments that do not are dropped
/// rather than failing the whole parse.
#[must_use]
pub fn extract_attributes(tag: &str) -> FxHashMap<String, String> {
    let tag = tag.split_once(':').map_or(tag, |(_, rest)| rest);

    let mut out = FxHashMap::default();
    for segment in tag.split(',') {
        let mut parts = segment.split('=');
        if let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Resolve a duration unit label to its multiplier.
///
/// Matching is case-insensitive. Unrecognized or missing labels resolve to
/// microseconds, which is also what Cassandra timers report by default.
#[must_use]
pub fn parse_duration_unit(label: &str) -> Duration {
    match label.to_lowercase().as_str() {
        "ns" | "nsec" | "nsecs" | "nanosecond" | "nanoseconds" => Duration::from_nanos(1),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => Duration::from_millis(1),
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(3600),
        // "î¼s" is "µs" after a round of UTF-8 mangling somewhere in the JMX
        // pipeline. It still means microseconds, as does anything we do not
        // recognize.
        _ => Duration::from_micros(1),
    }
}

/// The raw shape of a JMX timer or histogram attribute. Jolokia sends many
/// more fields than these; unknown fields are ignored and missing fields
/// default to zero so that schema drift degrades one group, not the client.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimerPayload {
    #[serde(rename = "Min")]
    min: f64,
    #[serde(rename = "Max")]
    max: f64,
    #[serde(rename = "75thPercentile")]
    p75: f64,
    #[serde(rename = "95thPercentile")]
    p95: f64,
    #[serde(rename = "99thPercentile")]
    p99: f64,
    #[serde(rename = "999thPercentile")]
    p999: f64,
    #[serde(rename = "Mean")]
    mean: f64,
    #[serde(rename = "Count")]
    count: u64,
    #[serde(rename = "DurationUnit")]
    duration_unit: Option<String>,
}

/// Decode a histogram attribute. Values are kept in whatever unit the bean
/// reported.
pub(crate) fn parse_histogram(value: &Value) -> Result<Histogram, serde_json::Error> {
    let raw: TimerPayload = TimerPayload::deserialize(value)?;
    Ok(Histogram {
        min: raw.min,
        max: raw.max,
        p75: raw.p75,
        p95: raw.p95,
        p99: raw.p99,
        p999: raw.p999,
        mean: raw.mean,
        count: raw.count,
    })
}

/// Decode a timer attribute, scaling every value field by the duration unit
/// declared in the payload. The count is not scaled.
pub(crate) fn parse_latency(value: &Value) -> Result<Latency, serde_json::Error> {
    let raw: TimerPayload = TimerPayload::deserialize(value)?;
    let unit = parse_duration_unit(raw.duration_unit.as_deref().unwrap_or_default());
    let scale =
        |v: f64| Duration::try_from_secs_f64(v * unit.as_secs_f64()).unwrap_or_default();
    Ok(Latency {
        min: scale(raw.min),
        max: scale(raw.max),
        p75: scale(raw.p75),
        p95: scale(raw.p95),
        p99: scale(raw.p99),
        p999: scale(raw.p999),
        mean: scale(raw.mean),
        count: raw.count,
    })
}

/// Read the `Value` field of a gauge attribute, defaulting to zero.
pub(crate) fn gauge_value(value: &Value) -> i64 {
    value.get("Value").and_then(Value::as_i64).unwrap_or_default()
}

/// Read the `Value` field of a gauge attribute as a float, defaulting to
/// zero. Some ratios come back as the string `"NaN"`; those decode to zero
/// as well.
pub(crate) fn float_value(value: &Value) -> f64 {
    value.get("Value").and_then(Value::as_f64).unwrap_or_default()
}

/// Read the `Count` field of a counter attribute, defaulting to zero.
pub(crate) fn counter_count(value: &Value) -> u64 {
    value.get("Count").and_then(Value::as_u64).unwrap_or_default()
}

/// Read the `Count` field of an attribute that is exposed with counter
/// plumbing but read as a gauge, defaulting to zero.
pub(crate) fn gauge_count(value: &Value) -> i64 {
    value.get("Count").and_then(Value::as_i64).unwrap_or_default()
}

/// Read the `Value` field of an attribute that is monotonically increasing
/// despite being exposed as a plain value, defaulting to zero.
pub(crate) fn counter_value(value: &Value) -> u64 {
    value.get("Value").and_then(Value::as_u64).unwrap_or_default()
}

/// Decode a JSON array of strings, dropping anything that is not a string.
pub(crate) fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attributes_with_domain_prefix() {
        let attrs = extract_attributes(
            "org.apache.cassandra.metrics:keyspace=system,name=LiveDiskSpaceUsed,scope=IndexInfo,type=Table",
        );
        assert_eq!(attrs.len(), 4);
        assert_eq!(attrs["keyspace"], "system");
        assert_eq!(attrs["name"], "LiveDiskSpaceUsed");
        assert_eq!(attrs["scope"], "IndexInfo");
        assert_eq!(attrs["type"], "Table");
    }

    #[test]
    fn attributes_without_domain_prefix() {
        let attrs = extract_attributes("keyspace=system,scope=IndexInfo");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["keyspace"], "system");
        assert_eq!(attrs["scope"], "IndexInfo");
    }

    #[test]
    fn attributes_of_bare_domain_are_empty() {
        let attrs = extract_attributes("org.apache.cassandra.metrics");
        assert!(attrs.is_empty());
    }

    #[test]
    fn malformed_segments_are_dropped() {
        let attrs = extract_attributes("dom:a=1,b,c=d=e,f=2");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["a"], "1");
        assert_eq!(attrs["f"], "2");
    }

    #[test]
    fn duration_units_resolve_case_insensitively() {
        let cases = [
            ("ns", Duration::from_nanos(1)),
            ("nsec", Duration::from_nanos(1)),
            ("Î¼s", Duration::from_micros(1)),
            ("µs", Duration::from_micros(1)),
            ("MiCROSecONDS", Duration::from_micros(1)),
            ("ms", Duration::from_millis(1)),
            ("MILLISECONDS", Duration::from_millis(1)),
            ("sec", Duration::from_secs(1)),
            ("MINUTES", Duration::from_secs(60)),
            ("hRs", Duration::from_secs(3600)),
        ];
        for (label, expected) in cases {
            assert_eq!(parse_duration_unit(label), expected, "label {label}");
        }
    }

    #[test]
    fn unknown_duration_units_default_to_microseconds() {
        assert_eq!(parse_duration_unit(""), Duration::from_micros(1));
        assert_eq!(parse_duration_unit("fortnights"), Duration::from_micros(1));
    }

    #[test]
    fn histogram_fields_are_not_scaled() {
        let payload = json!({
            "Min": 1.0,
            "Max": 100.0,
            "75thPercentile": 10.0,
            "95thPercentile": 20.0,
            "99thPercentile": 50.0,
            "999thPercentile": 90.0,
            "Mean": 12.5,
            "Count": 42,
            "DurationUnit": "microseconds",
        });
        let histogram = parse_histogram(&payload).expect("payload must decode");
        assert_eq!(
            histogram,
            Histogram {
                min: 1.0,
                max: 100.0,
                p75: 10.0,
                p95: 20.0,
                p99: 50.0,
                p999: 90.0,
                mean: 12.5,
                count: 42,
            }
        );
    }

    #[test]
    fn latency_fields_are_scaled_but_count_is_not() {
        let payload = json!({
            "Min": 1.0,
            "Max": 2000.0,
            "75thPercentile": 10.0,
            "95thPercentile": 20.0,
            "99thPercentile": 50.0,
            "999thPercentile": 90.0,
            "Mean": 15.0,
            "Count": 42,
            "DurationUnit": "MICROSECONDS",
        });
        let latency = parse_latency(&payload).expect("payload must decode");
        assert_eq!(latency.min, Duration::from_micros(1));
        assert_eq!(latency.max, Duration::from_micros(2000));
        assert_eq!(latency.p75, Duration::from_micros(10));
        assert_eq!(latency.p999, Duration::from_micros(90));
        assert_eq!(latency.mean, Duration::from_micros(15));
        assert_eq!(latency.count, 42);
    }

    #[test]
    fn latency_missing_unit_defaults_to_microseconds() {
        let payload = json!({ "Mean": 3.0, "Count": 1 });
        let latency = parse_latency(&payload).expect("payload must decode");
        assert_eq!(latency.mean, Duration::from_micros(3));
    }
}
