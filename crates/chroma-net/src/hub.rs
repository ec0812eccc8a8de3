//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Topic fan-out of backend push streams."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use chroma_msg::topic::Topic;
use chroma_msg::{
    log_payload, ControlMetricsExporter, LogLine, PayloadDirection, SemanticState, StatsSnapshot,
    TelemetryEvent, ViewportFrame,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::channel::{ChannelSettings, ChannelState, MessageSink, ReconnectingChannel};
use crate::rest::{BackendError, Endpoints};

const RUN_STATE_BUFFER: usize = 64;

/// Typed outlets of every topic.
///
/// Logs and run-state broadcasts are events and use broadcast channels so
/// each subscriber sees every item in order. Stats, semantic state and
/// viewport frames are level-triggered and use watch channels, so a slow
/// subscriber only ever sees the newest value.
struct Publishers {
    logs: broadcast::Sender<LogLine>,
    run_state: broadcast::Sender<bool>,
    stats: watch::Sender<Option<StatsSnapshot>>,
    semantic: watch::Sender<Option<SemanticState>>,
    viewport: watch::Sender<Option<ViewportFrame>>,
}

impl Publishers {
    fn new(log_buffer: usize) -> Self {
        let (logs, _) = broadcast::channel(log_buffer);
        let (run_state, _) = broadcast::channel(RUN_STATE_BUFFER);
        let (stats, _) = watch::channel(None);
        let (semantic, _) = watch::channel(None);
        let (viewport, _) = watch::channel(None);
        Self {
            logs,
            run_state,
            stats,
            semantic,
            viewport,
        }
    }

    fn publish(&self, event: TelemetryEvent) {
        match event {
            // No subscriber simply means nobody is rendering this topic yet.
            TelemetryEvent::Log(line) => {
                let _ = self.logs.send(line);
            }
            TelemetryEvent::RunState { running } => {
                let _ = self.run_state.send(running);
            }
            TelemetryEvent::Stats(stats) => {
                self.stats.send_replace(Some(stats));
            }
            TelemetryEvent::Semantic(state) => {
                self.semantic.send_replace(Some(state));
            }
            TelemetryEvent::Viewport(frame) => {
                self.viewport.send_replace(Some(frame));
            }
        }
    }
}

struct TopicSink {
    topic: Topic,
    publishers: Arc<Publishers>,
    metrics: Option<ControlMetricsExporter>,
}

impl MessageSink for TopicSink {
    fn deliver(&self, payload: String) {
        log_payload(PayloadDirection::Inbound, Some(self.topic), payload.len());
        if let Some(metrics) = &self.metrics {
            metrics.observe_received(self.topic);
        }
        match TelemetryEvent::decode(self.topic, &payload) {
            Ok(event) => self.publishers.publish(event),
            Err(err) => {
                warn!(topic = %self.topic, error = %err, "dropping malformed telemetry payload");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_malformed(self.topic);
                }
            }
        }
    }
}

/// Publish/subscribe hub over the backend push streams.
///
/// Each topic is carried by its own [`ReconnectingChannel`], so one stream
/// failing or reconnecting never disturbs the others. A topic has at most
/// one channel at a time.
pub struct TelemetryHub {
    endpoints: Endpoints,
    settings: ChannelSettings,
    publishers: Arc<Publishers>,
    channels: Mutex<BTreeMap<Topic, ReconnectingChannel>>,
}

impl TelemetryHub {
    /// Create a hub; no stream is opened until [`TelemetryHub::connect`].
    pub fn new(endpoints: Endpoints, settings: ChannelSettings, log_buffer: usize) -> Self {
        Self {
            endpoints,
            settings,
            publishers: Arc::new(Publishers::new(log_buffer.max(1))),
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open the stream for `topic`. Returns `false` if it is already open.
    pub fn connect(&self, topic: Topic) -> Result<bool, BackendError> {
        let mut channels = self.channels.lock();
        if channels.contains_key(&topic) {
            debug!(topic = %topic, "topic already connected");
            return Ok(false);
        }
        let url = self.endpoints.stream(topic)?;
        let sink = Arc::new(TopicSink {
            topic,
            publishers: self.publishers.clone(),
            metrics: self.settings.metrics.clone(),
        });
        let channel = ReconnectingChannel::spawn(topic, url, self.settings.clone(), sink);
        channels.insert(topic, channel);
        Ok(true)
    }

    /// Open every topic in `topics`.
    pub fn connect_all(&self, topics: &[Topic]) -> Result<(), BackendError> {
        for topic in topics {
            self.connect(*topic)?;
        }
        Ok(())
    }

    /// Close the stream for `topic`. Returns `false` if it was not open.
    pub async fn disconnect(&self, topic: Topic) -> anyhow::Result<bool> {
        let channel = self.channels.lock().remove(&topic);
        match channel {
            Some(channel) => {
                channel.shutdown().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every stream and wait for the connection tasks to finish.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let channels = std::mem::take(&mut *self.channels.lock());
        for (topic, channel) in channels {
            if let Err(err) = channel.shutdown().await {
                warn!(topic = %topic, error = %err, "stream task ended abnormally");
            }
        }
        Ok(())
    }

    /// Topics with an open channel.
    pub fn connected_topics(&self) -> Vec<Topic> {
        self.channels.lock().keys().copied().collect()
    }

    /// State of the channel serving `topic`.
    pub fn channel_state(&self, topic: Topic) -> Option<ChannelState> {
        self.channels.lock().get(&topic).map(ReconnectingChannel::state)
    }

    /// Watch the channel serving `topic`.
    pub fn watch_channel(&self, topic: Topic) -> Option<watch::Receiver<ChannelState>> {
        self.channels
            .lock()
            .get(&topic)
            .map(ReconnectingChannel::watch_state)
    }

    /// Ordered log lines.
    pub fn logs(&self) -> broadcast::Receiver<LogLine> {
        self.publishers.logs.subscribe()
    }

    /// Run-state broadcasts, `true` while a script runs.
    pub fn run_state(&self) -> broadcast::Receiver<bool> {
        self.publishers.run_state.subscribe()
    }

    /// Latest stats snapshot.
    pub fn stats(&self) -> watch::Receiver<Option<StatsSnapshot>> {
        self.publishers.stats.subscribe()
    }

    /// Latest semantic state.
    pub fn semantic_state(&self) -> watch::Receiver<Option<SemanticState>> {
        self.publishers.semantic.subscribe()
    }

    /// Latest viewport frame.
    pub fn viewport(&self) -> watch::Receiver<Option<ViewportFrame>> {
        self.publishers.viewport.subscribe()
    }

    /// Endpoint layout the hub connects to.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}
