//! Process-level counters and gauges for both push tiers
//!
//! Counters are plain atomics so the dispatch and job workers can update
//! them on the hot path without locking. A point-in-time snapshot can be
//! exported as JSON or in the Prometheus text format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::{Result, RustyPushError};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.incr_by(1);
    }

    pub fn incr_by(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge that can move in both directions
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metric value types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
}

/// A single metric data point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    pub labels: BTreeMap<String, String>,
}

impl Metric {
    fn counter(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            value: MetricValue::Counter(value),
            labels: BTreeMap::new(),
        }
    }

    fn gauge(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: MetricValue::Gauge(value),
            labels: BTreeMap::new(),
        }
    }

    fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// Render metrics in a specific format (prometheus, json)
pub fn export_metrics(metrics: &[Metric], format: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(metrics)?),
        "prometheus" => {
            let mut output = String::new();

            for metric in metrics {
                let kind = match metric.value {
                    MetricValue::Counter(_) => "counter",
                    MetricValue::Gauge(_) => "gauge",
                };
                output.push_str(&format!("# TYPE {} {}\n", metric.name, kind));

                let labels_str = if metric.labels.is_empty() {
                    String::new()
                } else {
                    let labels: Vec<String> = metric
                        .labels
                        .iter()
                        .map(|(k, v)| format!("{}=\"{}\"", k, v))
                        .collect();
                    format!("{{{}}}", labels.join(","))
                };

                match metric.value {
                    MetricValue::Counter(value) => {
                        output.push_str(&format!("{}{} {}\n", metric.name, labels_str, value));
                    }
                    MetricValue::Gauge(value) => {
                        output.push_str(&format!("{}{} {}\n", metric.name, labels_str, value));
                    }
                }
            }

            Ok(output)
        }
        _ => Err(RustyPushError::MessageParseError(format!(
            "Unsupported export format: {}",
            format
        ))),
    }
}

/// Gateway tier statistics
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub online_connections: Gauge,
    pub room_count: Gauge,
    /// Jobs waiting in the dispatch queue
    pub dispatch_pending: Gauge,
    pub dispatch_total: Counter,
    /// Submissions rejected because the dispatch queue was full
    pub dispatch_fail: Counter,
    /// Jobs dropped because their message could not be serialized
    pub serialize_fail: Counter,
    /// Jobs waiting in bucket job queues
    pub push_job_pending: Gauge,
    /// Messages that could not be enqueued on a client connection
    pub push_fail: Counter,
    /// Messages enqueued on client connections
    pub send_message_total: Counter,
    /// RoomOne jobs that found no member in any bucket
    pub room_one_miss: Counter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatsSnapshot {
    pub online_connections: i64,
    pub room_count: i64,
    pub dispatch_pending: i64,
    pub dispatch_total: u64,
    pub dispatch_fail: u64,
    pub serialize_fail: u64,
    pub push_job_pending: i64,
    pub push_fail: u64,
    pub send_message_total: u64,
    pub room_one_miss: u64,
    pub collected_at: DateTime<Utc>,
}

impl GatewayStats {
    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            online_connections: self.online_connections.get(),
            room_count: self.room_count.get(),
            dispatch_pending: self.dispatch_pending.get(),
            dispatch_total: self.dispatch_total.get(),
            dispatch_fail: self.dispatch_fail.get(),
            serialize_fail: self.serialize_fail.get(),
            push_job_pending: self.push_job_pending.get(),
            push_fail: self.push_fail.get(),
            send_message_total: self.send_message_total.get(),
            room_one_miss: self.room_one_miss.get(),
            collected_at: Utc::now(),
        }
    }
}

impl GatewayStatsSnapshot {
    pub fn to_metrics(&self) -> Vec<Metric> {
        vec![
            Metric::gauge("gateway_online_connections", self.online_connections),
            Metric::gauge("gateway_room_count", self.room_count),
            Metric::gauge("gateway_dispatch_pending", self.dispatch_pending),
            Metric::counter("gateway_dispatch_total", self.dispatch_total),
            Metric::counter("gateway_dispatch_fail_total", self.dispatch_fail),
            Metric::counter("gateway_serialize_fail_total", self.serialize_fail),
            Metric::gauge("gateway_push_job_pending", self.push_job_pending),
            Metric::counter("gateway_push_fail_total", self.push_fail),
            Metric::counter("gateway_send_message_total", self.send_message_total),
            Metric::counter("gateway_room_one_miss_total", self.room_one_miss),
        ]
    }
}

/// Logic tier statistics
#[derive(Debug, Default)]
pub struct LogicStats {
    /// Items accepted into the dispatch queue
    pub dispatch_total: Counter,
    /// Items rejected because the dispatch queue was full
    pub dispatch_fail: Counter,
    pub gateway_push_total: Counter,
    /// Gateway pushes that failed on the network or with a bad status
    pub gateway_push_fail: Counter,
    /// Gateway pushes dropped because the gateway was at its in-flight cap
    pub gateway_drop: Counter,
}

/// In-flight state of one configured gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInFlight {
    pub gateway: String,
    pub in_flight: usize,
    pub max_pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicStatsSnapshot {
    pub dispatch_total: u64,
    pub dispatch_fail: u64,
    pub gateway_push_total: u64,
    pub gateway_push_fail: u64,
    pub gateway_drop: u64,
    pub gateways: Vec<GatewayInFlight>,
    pub collected_at: DateTime<Utc>,
}

impl LogicStats {
    pub fn snapshot(&self, gateways: Vec<GatewayInFlight>) -> LogicStatsSnapshot {
        LogicStatsSnapshot {
            dispatch_total: self.dispatch_total.get(),
            dispatch_fail: self.dispatch_fail.get(),
            gateway_push_total: self.gateway_push_total.get(),
            gateway_push_fail: self.gateway_push_fail.get(),
            gateway_drop: self.gateway_drop.get(),
            gateways,
            collected_at: Utc::now(),
        }
    }
}

impl LogicStatsSnapshot {
    pub fn to_metrics(&self) -> Vec<Metric> {
        let mut metrics = vec![
            Metric::counter("logic_dispatch_items_total", self.dispatch_total),
            Metric::counter("logic_dispatch_fail_items_total", self.dispatch_fail),
            Metric::counter("logic_gateway_push_total", self.gateway_push_total),
            Metric::counter("logic_gateway_push_fail_total", self.gateway_push_fail),
            Metric::counter("logic_gateway_drop_total", self.gateway_drop),
        ];
        for gateway in &self.gateways {
            metrics.push(
                Metric::gauge("logic_gateway_in_flight", gateway.in_flight as i64)
                    .with_label("gateway", &gateway.gateway),
            );
        }
        metrics
    }
}
