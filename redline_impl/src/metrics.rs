//! Counter snapshots, rendered as one of three well-known metrics text
//! formats.

use crate::clock;
use crate::conn::aggregate_connection_counters;
use crate::lock::snapshot_lock_records;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;

/// The output format of a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotFormat {
    /// An array of objects `{"metrics": "<name>", <tags>..., "value": n}`.
    Json,
    /// Influx line protocol: `<name>,<k>=<v> value=<n>i`.
    Influx,
    /// Prometheus exposition format: `<name>{<k>="<v>"} <n>`.
    Prometheus,
}

const CONNECTION_METRICS: [&str; 5] = [
    "redline_ops",
    "redline_sendbytes",
    "redline_recvbytes",
    "redline_sendcost",
    "redline_recvcost",
];

const LOCK_METRICS: [&str; 7] = [
    "redline_lockcount",
    "redline_faillockcount",
    "redline_trylock",
    "redline_maxtrylock",
    "redline_locked",
    "redline_maxlocked",
    "redline_spincount",
];

/// Renders the counters aggregated over all live connections.
///
/// `prefix` is prepended to every metric name; `tags` are attached
/// verbatim (neither is escaped, keep them free of characters the chosen
/// format forbids). Cost metrics are microseconds.
pub fn connection_snapshot(
    format: SnapshotFormat,
    prefix: &str,
    tags: &BTreeMap<String, String>,
) -> String {
    let totals = aggregate_connection_counters();
    let rows: Vec<Row> = CONNECTION_METRICS
        .into_iter()
        .zip(totals)
        .map(|(name, value)| Row {
            name,
            key: None,
            value,
        })
        .collect();
    render(format, prefix, tags, &rows)
}

/// Renders the per-key lock statistics, each row tagged with the
/// canonicalized lock key. Times are microseconds.
pub fn lock_snapshot(
    format: SnapshotFormat,
    prefix: &str,
    tags: &BTreeMap<String, String>,
) -> String {
    let per_us = clock::tsc_per_us();
    let mut rows = Vec::new();
    for (key, data) in snapshot_lock_records() {
        let values = [
            data.lock_count.load(Ordering::Relaxed),
            data.fail_count.load(Ordering::Relaxed),
            data.try_tsc.load(Ordering::Relaxed) / per_us,
            data.try_max_tsc.load(Ordering::Relaxed) / per_us,
            data.held_tsc.load(Ordering::Relaxed) / per_us,
            data.held_max_tsc.load(Ordering::Relaxed) / per_us,
            data.spin_count.load(Ordering::Relaxed),
        ];
        for (name, value) in LOCK_METRICS.into_iter().zip(values) {
            rows.push(Row {
                name,
                key: Some(key.clone()),
                value,
            });
        }
    }
    render(format, prefix, tags, &rows)
}

struct Row {
    name: &'static str,
    key: Option<String>,
    value: i64,
}

fn render(
    format: SnapshotFormat,
    prefix: &str,
    tags: &BTreeMap<String, String>,
    rows: &[Row],
) -> String {
    match format {
        SnapshotFormat::Json => {
            let objects: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let mut object = json!({
                        "metrics": format!("{prefix}{}", row.name),
                        "value": row.value,
                    });
                    let map = object.as_object_mut().expect("object literal");
                    if let Some(key) = &row.key {
                        map.insert("key".to_string(), json!(key));
                    }
                    for (k, v) in tags {
                        map.insert(k.clone(), json!(v));
                    }
                    object
                })
                .collect();
            Value::Array(objects).to_string()
        }
        SnapshotFormat::Influx => {
            let mut out = String::new();
            for row in rows {
                let _ = write!(out, "{prefix}{}", row.name);
                if let Some(key) = &row.key {
                    let _ = write!(out, ",key={key}");
                }
                for (k, v) in tags {
                    let _ = write!(out, ",{k}={v}");
                }
                let _ = writeln!(out, " value={}i", row.value);
            }
            out
        }
        SnapshotFormat::Prometheus => {
            let mut out = String::new();
            for row in rows {
                let _ = write!(out, "{prefix}{}", row.name);
                let mut labels: Vec<String> = Vec::new();
                if let Some(key) = &row.key {
                    labels.push(format!("key=\"{key}\""));
                }
                labels.extend(tags.iter().map(|(k, v)| format!("{k}=\"{v}\"")));
                if !labels.is_empty() {
                    let _ = write!(out, "{{{}}}", labels.join(","));
                }
                let _ = writeln!(out, " {}", row.value);
            }
            out
        }
    }
}
