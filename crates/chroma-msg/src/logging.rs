//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::topic::Topic;

/// Direction of a payload, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadDirection {
    /// Request sent to the backend.
    Outbound,
    /// Push received from the backend.
    Inbound,
}

/// Emit a structured log entry for stream or request activity.
pub fn log_payload(direction: PayloadDirection, topic: Option<Topic>, bytes: usize) {
    let topic = topic.map(|topic| topic.to_string());
    debug!(
        topic = topic.as_deref().unwrap_or("api"),
        bytes,
        direction = ?direction,
        "control-plane payload"
    );
}

/// Prometheus metric handles for control-plane activity.
#[derive(Clone)]
pub struct ControlMetricsExporter {
    updates_sent: IntCounter,
    updates_failed: IntCounter,
    updates_superseded: IntCounter,
    update_latency: Histogram,
    connections: IntCounterVec,
    received: IntCounterVec,
    malformed: IntCounterVec,
}

impl ControlMetricsExporter {
    /// Register control-plane metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let updates_sent = IntCounter::with_opts(Opts::new(
            "chroma_parameter_updates_sent_total",
            "Parameter updates acknowledged by the backend",
        ))?;
        let updates_failed = IntCounter::with_opts(Opts::new(
            "chroma_parameter_updates_failed_total",
            "Parameter updates that failed in transit or were refused",
        ))?;
        let updates_superseded = IntCounter::with_opts(Opts::new(
            "chroma_parameter_updates_superseded_total",
            "Pending parameter values overwritten before they were sent",
        ))?;
        let update_latency = Histogram::with_opts(HistogramOpts::new(
            "chroma_parameter_update_roundtrip_seconds",
            "Round trip time of parameter updates",
        ))?;
        let connections = IntCounterVec::new(
            Opts::new(
                "chroma_stream_connections_total",
                "Telemetry stream connections opened",
            ),
            &["topic"],
        )?;
        let received = IntCounterVec::new(
            Opts::new(
                "chroma_telemetry_messages_total",
                "Telemetry messages received",
            ),
            &["topic"],
        )?;
        let malformed = IntCounterVec::new(
            Opts::new(
                "chroma_telemetry_malformed_total",
                "Telemetry messages dropped because they failed to decode",
            ),
            &["topic"],
        )?;

        registry.register(Box::new(updates_sent.clone()))?;
        registry.register(Box::new(updates_failed.clone()))?;
        registry.register(Box::new(updates_superseded.clone()))?;
        registry.register(Box::new(update_latency.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(malformed.clone()))?;

        Ok(Self {
            updates_sent,
            updates_failed,
            updates_superseded,
            update_latency,
            connections,
            received,
            malformed,
        })
    }

    /// Record an acknowledged parameter update and its round trip.
    pub fn observe_update_sent(&self, latency: Duration) {
        self.updates_sent.inc();
        self.update_latency.observe(latency.as_secs_f64());
    }

    /// Record a failed parameter update.
    pub fn observe_update_failed(&self) {
        self.updates_failed.inc();
    }

    /// Record a pending value replaced before it was sent.
    pub fn observe_update_superseded(&self) {
        self.updates_superseded.inc();
    }

    /// Record a stream connection being opened.
    pub fn observe_connection(&self, topic: Topic) {
        self.connections.with_label_values(&[topic.as_ref()]).inc();
    }

    /// Record a received telemetry message.
    pub fn observe_received(&self, topic: Topic) {
        self.received.with_label_values(&[topic.as_ref()]).inc();
    }

    /// Record a telemetry message dropped by the decoder.
    pub fn observe_malformed(&self, topic: Topic) {
        self.malformed.with_label_values(&[topic.as_ref()]).inc();
    }
}
