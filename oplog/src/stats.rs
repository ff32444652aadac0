//! Counters exposed on `/status` and `/metrics`.

use axum::http::Method;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for HTTP request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabelsWithStatus {
    pub method: HttpMethod,
    pub endpoint: String,
    pub status: u16,
}

/// HTTP method label value.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HttpMethod {
    Get,
    Post,
    Other,
}

impl From<&Method> for HttpMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => HttpMethod::Get,
            Method::POST => HttpMethod::Post,
            _ => HttpMethod::Other,
        }
    }
}

/// All statistics about a running oplog.
///
/// The same counters back the Prometheus `/metrics` endpoint and the JSON
/// `/status` document.
pub struct Stats {
    registry: Registry,

    /// Events received on the UDP interface.
    pub events_received: Counter,
    /// Events sent over the SSE interface.
    pub events_sent: Counter,
    /// Events appended to the store with success.
    pub events_ingested: Counter,
    /// Events received with an invalid format.
    pub events_error: Counter,
    /// Events dropped because the ingest queue was full.
    pub events_discarded: Counter,
    /// Current number of events in the ingest queue.
    pub queue_size: Gauge,
    /// Capacity of the ingest queue.
    pub queue_max_size: Gauge,
    /// Currently connected SSE clients.
    pub clients: Gauge,
    /// Total SSE connections accepted.
    pub connections: Counter,
    /// HTTP requests by method, endpoint, and status.
    pub http_requests_total: Family<HttpLabelsWithStatus, Counter>,
}

impl Stats {
    pub fn new(queue_max: usize) -> Self {
        let mut registry = Registry::default();

        let events_received = Counter::default();
        registry.register(
            "oplog_events_received",
            "Events received on the UDP interface",
            events_received.clone(),
        );

        let events_sent = Counter::default();
        registry.register(
            "oplog_events_sent",
            "Events sent over the SSE interface",
            events_sent.clone(),
        );

        let events_ingested = Counter::default();
        registry.register(
            "oplog_events_ingested",
            "Events appended to the store with success",
            events_ingested.clone(),
        );

        let events_error = Counter::default();
        registry.register(
            "oplog_events_error",
            "Events received with an invalid format",
            events_error.clone(),
        );

        let events_discarded = Counter::default();
        registry.register(
            "oplog_events_discarded",
            "Events dropped because the ingest queue was full",
            events_discarded.clone(),
        );

        let queue_size = Gauge::default();
        registry.register(
            "oplog_queue_size",
            "Current number of events in the ingest queue",
            queue_size.clone(),
        );

        let queue_max_size = Gauge::default();
        queue_max_size.set(queue_max as i64);
        registry.register(
            "oplog_queue_max_size",
            "Capacity of the ingest queue",
            queue_max_size.clone(),
        );

        let clients = Gauge::default();
        registry.register(
            "oplog_clients",
            "Currently connected SSE clients",
            clients.clone(),
        );

        let connections = Counter::default();
        registry.register(
            "oplog_connections",
            "Total SSE connections accepted",
            connections.clone(),
        );

        let http_requests_total = Family::<HttpLabelsWithStatus, Counter>::default();
        registry.register(
            "oplog_http_requests",
            "HTTP requests by method, endpoint and status",
            http_requests_total.clone(),
        );

        Self {
            registry,
            events_received,
            events_sent,
            events_ingested,
            events_error,
            events_discarded,
            queue_size,
            queue_max_size,
            clients,
            connections,
            http_requests_total,
        }
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("encoding metrics should not fail");
        buffer
    }

    /// The `/status` JSON document.
    pub fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "OK",
            "events_received": self.events_received.get(),
            "events_sent": self.events_sent.get(),
            "events_ingested": self.events_ingested.get(),
            "events_error": self.events_error.get(),
            "events_discarded": self.events_discarded.get(),
            "queue_size": self.queue_size.get(),
            "queue_max_size": self.queue_max_size.get(),
            "clients": self.clients.get(),
            "connections": self.connections.get(),
        })
    }
}
