//! Per-operation metrics collector.
//!
//! Tracks invocation count, errors and a latency distribution for each
//! named operation, and mirrors every sample to the Prometheus exporter.
//! Records idle longer than the configured window are purged by
//! [`MetricsCollector::cleanup`]; callers treat a missing record as "no
//! data yet", never as an error.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics as export;
use crate::resilience::store::{MemoryStore, SharedStore};

/// Latency samples kept per operation.
pub const MAX_LATENCY_SAMPLES: usize = 1000;

/// Default idle time before a record is purged.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub sum_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Most recent samples, oldest first.
    pub values: VecDeque<f64>,
}

#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub count: u64,
    pub errors: u64,
    pub latency: LatencyRecord,
    pub last_updated: Instant,
}

impl MetricRecord {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            errors: 0,
            latency: LatencyRecord {
                sum_ms: 0.0,
                min_ms: f64::INFINITY,
                max_ms: 0.0,
                values: VecDeque::new(),
            },
            last_updated: now,
        }
    }

    fn record(&mut self, duration_ms: f64, is_error: bool, now: Instant) {
        self.count += 1;
        if is_error {
            self.errors += 1;
        }
        self.latency.sum_ms += duration_ms;
        self.latency.min_ms = self.latency.min_ms.min(duration_ms);
        self.latency.max_ms = self.latency.max_ms.max(duration_ms);
        self.latency.values.push_back(duration_ms);
        while self.latency.values.len() > MAX_LATENCY_SAMPLES {
            self.latency.values.pop_front();
        }
        self.last_updated = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Derived view of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub count: u64,
    /// Percentage of failed invocations.
    pub error_rate: f64,
    pub latency: LatencySnapshot,
}

/// Outcome of looking a record up, decided once at the read boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricReading {
    Recorded(MetricSnapshot),
    /// Unknown key, or started but never completed.
    NoData,
    Inconsistent { reason: String },
}

impl MetricReading {
    fn from_record(record: &MetricRecord) -> Self {
        if record.count == 0 {
            return MetricReading::NoData;
        }
        if record.errors > record.count {
            return MetricReading::Inconsistent {
                reason: format!("{} errors for {} calls", record.errors, record.count),
            };
        }
        if record.latency.values.is_empty() {
            return MetricReading::Inconsistent {
                reason: "no latency samples".to_string(),
            };
        }

        let mut sorted: Vec<f64> = record.latency.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        MetricReading::Recorded(MetricSnapshot {
            count: record.count,
            error_rate: record.errors as f64 / record.count as f64 * 100.0,
            latency: LatencySnapshot {
                avg: record.latency.sum_ms / record.count as f64,
                min: record.latency.min_ms,
                max: record.latency.max_ms,
                median,
            },
        })
    }

    pub fn snapshot(&self) -> Option<&MetricSnapshot> {
        match self {
            MetricReading::Recorded(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

type SharedRecord = Arc<Mutex<MetricRecord>>;

/// Collects per-operation metrics.
pub struct MetricsCollector {
    records: SharedStore<SharedRecord>,
    idle_window: Duration,
}

impl MetricsCollector {
    pub fn new(idle_window: Duration) -> Self {
        Self::with_store(MemoryStore::shared(), idle_window)
    }

    pub fn with_store(records: SharedStore<SharedRecord>, idle_window: Duration) -> Self {
        Self {
            records,
            idle_window,
        }
    }

    fn record_for(&self, key: &str) -> SharedRecord {
        self.records.get_or_insert_with(key, &mut || {
            Arc::new(Mutex::new(MetricRecord::new(Instant::now())))
        })
    }

    /// Start timing `key`, creating its record if needed.
    pub fn start_operation(&self, key: &str) -> Instant {
        self.record_for(key);
        Instant::now()
    }

    /// Record the outcome of an operation started at `start`.
    pub fn end_operation(&self, key: &str, start: Instant, is_error: bool) {
        let now = Instant::now();
        let elapsed = now.duration_since(start);
        let record = self.record_for(key);
        record
            .lock()
            .expect("metric record mutex poisoned")
            .record(elapsed.as_secs_f64() * 1000.0, is_error, now);

        export::record_operation(key, is_error, elapsed);
    }

    pub fn reading(&self, key: &str) -> MetricReading {
        match self.records.get(key) {
            Some(record) => {
                MetricReading::from_record(&record.lock().expect("metric record mutex poisoned"))
            }
            None => MetricReading::NoData,
        }
    }

    /// Derived snapshot, or `None` when there is no usable data.
    pub fn get_metrics(&self, key: &str) -> Option<MetricSnapshot> {
        self.reading(key).snapshot().cloned()
    }

    pub fn all(&self) -> BTreeMap<String, MetricReading> {
        self.records
            .entries()
            .into_iter()
            .map(|(key, record)| {
                let reading =
                    MetricReading::from_record(&record.lock().expect("metric record mutex poisoned"));
                (key, reading)
            })
            .collect()
    }

    /// Drop records not updated within the idle window.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(&mut |_, record| {
            let last = record.lock().expect("metric record mutex poisoned").last_updated;
            now.duration_since(last) <= self.idle_window
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WINDOW)
    }
}
