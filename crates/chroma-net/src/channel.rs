//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Supervised push-stream connection with fixed-delay reconnect."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chroma_logging::{chroma_debug, chroma_info, chroma_warn, LogContext};
use chroma_msg::topic::Topic;
use chroma_msg::ControlMetricsExporter;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;

const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Receives every text payload read from a stream, in arrival order.
///
/// Called on the connection task, so implementations must not block.
pub trait MessageSink: Send + Sync + 'static {
    /// Hand over one payload.
    fn deliver(&self, payload: String);
}

impl<F> MessageSink for F
where
    F: Fn(String) + Send + Sync + 'static,
{
    fn deliver(&self, payload: String) {
        self(payload)
    }
}

/// Lifecycle of the single connection owned by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connection attempt is in progress.
    Connecting,
    /// The stream is live.
    Open,
    /// No connection; a retry is scheduled unless the channel was shut down.
    Closed,
}

/// Observable state of a [`ReconnectingChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// Stream URL.
    pub url: String,
    /// Current connection status.
    pub status: ConnectionStatus,
    /// Fixed delay before each reconnect attempt.
    pub retry_delay: Duration,
    /// Connections successfully opened so far.
    pub connections: u64,
    /// Reason the last connection ended or failed.
    pub last_error: Option<String>,
}

/// Tuning shared by every channel of a hub.
#[derive(Clone)]
pub struct ChannelSettings {
    /// Delay between a close and the next attempt. Never grows.
    pub reconnect_delay: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Optional counters for opened connections.
    pub metrics: Option<ControlMetricsExporter>,
}

impl ChannelSettings {
    /// Settings with the given reconnect delay and a five second connect timeout.
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            reconnect_delay,
            connect_timeout: Duration::from_secs(5),
            metrics: None,
        }
    }

    /// Read delays from the streams section of the client configuration.
    pub fn from_config(config: &chroma_common::StreamsConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            metrics: None,
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: ControlMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

/// Owns one logical subscription to a push stream and keeps it alive.
///
/// A single task connects, forwards every payload to the sink, and after
/// any close or error waits the fixed delay and connects again, forever.
/// Because one task runs the whole loop sequentially there is never more
/// than one live connection. Payloads sent while disconnected are lost.
pub struct ReconnectingChannel {
    topic: Topic,
    state: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconnectingChannel {
    /// Start supervising `url`. Must be called from within a tokio runtime.
    pub fn spawn(
        topic: Topic,
        url: Url,
        settings: ChannelSettings,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState {
            url: url.to_string(),
            status: ConnectionStatus::Connecting,
            retry_delay: settings.reconnect_delay,
            connections: 0,
            last_error: None,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            topic,
            url.to_string(),
            settings,
            sink,
            state_tx,
            shutdown_rx,
        ));
        Self {
            topic,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Topic this channel serves.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Stop reconnecting, close the live connection and wait for the task.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Ended(String),
}

async fn supervise(
    topic: Topic,
    url: String,
    settings: ChannelSettings,
    sink: Arc<dyn MessageSink>,
    state: watch::Sender<ChannelState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u64 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        attempt += 1;
        state.send_modify(|s| s.status = ConnectionStatus::Connecting);

        let reason = match run_session(topic, &url, &settings, sink.as_ref(), &state, &mut shutdown)
            .await
        {
            SessionEnd::Shutdown => break,
            SessionEnd::Ended(reason) => reason,
        };

        state.send_modify(|s| {
            s.status = ConnectionStatus::Closed;
            s.last_error = Some(reason.clone());
        });
        let ctx = LogContext::new()
            .with_topic(topic.as_ref())
            .with_url(&url)
            .with_attempt(attempt);
        chroma_warn!(
            context = ctx,
            "stream closed: {}; reconnecting in {} ms",
            reason,
            settings.reconnect_delay.as_millis()
        );

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(settings.reconnect_delay) => {}
        }
    }
    state.send_modify(|s| s.status = ConnectionStatus::Closed);
    let ctx = LogContext::new().with_topic(topic.as_ref()).with_url(&url);
    chroma_debug!(context = ctx, "stream supervisor stopped");
}

async fn run_session(
    topic: Topic,
    url: &str,
    settings: &ChannelSettings,
    sink: &dyn MessageSink,
    state: &watch::Sender<ChannelState>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let stream = tokio::select! {
        _ = shutdown.changed() => return SessionEnd::Shutdown,
        result = timeout(settings.connect_timeout, connect_async(url)) => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => return SessionEnd::Ended(format!("connect failed: {err}")),
            Err(_) => {
                return SessionEnd::Ended(format!(
                    "connect timed out after {} ms",
                    settings.connect_timeout.as_millis()
                ))
            }
        },
    };

    state.send_modify(|s| {
        s.status = ConnectionStatus::Open;
        s.connections += 1;
        s.last_error = None;
    });
    if let Some(metrics) = &settings.metrics {
        metrics.observe_connection(topic);
    }
    let ctx = LogContext::new().with_topic(topic.as_ref()).with_url(url);
    chroma_info!(context = ctx, "stream connected");

    let (mut writer, mut reader) = stream.split();
    let end = loop {
        tokio::select! {
            _ = shutdown.changed() => break SessionEnd::Shutdown,
            frame = reader.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => sink.deliver(text),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => sink.deliver(text),
                    Err(_) => chroma_debug!(context = ctx, "dropping non utf-8 binary frame"),
                },
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(err) = writer.send(WsMessage::Pong(payload)).await {
                        break SessionEnd::Ended(format!("pong failed: {err}"));
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|frame| format!("closed by peer ({} {})", u16::from(frame.code), frame.reason))
                        .unwrap_or_else(|| "closed by peer".to_owned());
                    break SessionEnd::Ended(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break SessionEnd::Ended(format!("stream error: {err}")),
                None => break SessionEnd::Ended("stream ended".to_owned()),
            },
        }
    };

    // Close our side before any retry so only one connection is ever live.
    let _ = timeout(CLOSE_GRACE, writer.close()).await;
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chroma_testharness::MockBackend;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn collecting_sink() -> (Arc<dyn MessageSink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn MessageSink> = Arc::new(move |payload: String| {
            let _ = tx.send(payload);
        });
        (sink, rx)
    }

    async fn wait_for_status(
        channel: &ReconnectingChannel,
        wanted: ConnectionStatus,
        min_connections: u64,
    ) -> ChannelState {
        let mut watch = channel.watch_state();
        let state = timeout(
            Duration::from_secs(5),
            watch.wait_for(|s| s.status == wanted && s.connections >= min_connections),
        )
        .await
        .expect("state reached in time")
        .expect("channel alive");
        let snapshot = state.clone();
        snapshot
    }

    #[tokio::test]
    async fn forwards_payloads_in_order() {
        let mock = MockBackend::spawn().await.unwrap();
        let (sink, mut rx) = collecting_sink();
        let url = Url::parse(&format!("{}/ws/logs", mock.ws_base_url())).unwrap();
        let channel = ReconnectingChannel::spawn(
            Topic::Logs,
            url,
            ChannelSettings::new(Duration::from_millis(100)),
            sink,
        );
        wait_for_status(&channel, ConnectionStatus::Open, 1).await;
        assert!(
            mock.wait_for_connections(Topic::Logs, 1, Duration::from_secs(2))
                .await
        );

        for line in ["one", "two", "three"] {
            mock.publish(Topic::Logs, line);
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(
                timeout(Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(received, vec!["one", "two", "three"]);

        channel.shutdown().await.unwrap();
        mock.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_forced_close_within_delay() {
        let delay = Duration::from_millis(300);
        let mock = MockBackend::spawn().await.unwrap();
        let (sink, mut rx) = collecting_sink();
        let url = Url::parse(&format!("{}/ws/viewport", mock.ws_base_url())).unwrap();
        let channel =
            ReconnectingChannel::spawn(Topic::Viewport, url, ChannelSettings::new(delay), sink);
        wait_for_status(&channel, ConnectionStatus::Open, 1).await;
        assert!(
            mock.wait_for_connections(Topic::Viewport, 1, Duration::from_secs(2))
                .await
        );

        let dropped_at = Instant::now();
        mock.drop_connections(Topic::Viewport);
        let state = wait_for_status(&channel, ConnectionStatus::Open, 2).await;
        let elapsed = dropped_at.elapsed();
        assert!(elapsed >= delay, "reconnected too early: {elapsed:?}");
        assert!(
            elapsed < delay + Duration::from_secs(2),
            "reconnect took {elapsed:?}"
        );
        assert_eq!(state.retry_delay, delay);
        assert_eq!(mock.total_connections(Topic::Viewport), 2);
        assert_eq!(mock.peak_connections(Topic::Viewport), 1);

        assert!(
            mock.wait_for_connections(Topic::Viewport, 1, Duration::from_secs(2))
                .await
        );
        mock.publish(Topic::Viewport, "data:image/png;base64,AAAA");
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, "data:image/png;base64,AAAA");

        channel.shutdown().await.unwrap();
        mock.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn keeps_retrying_unreachable_backend() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let (sink, _rx) = collecting_sink();
        let url = Url::parse(&format!("ws://{address}/ws/stats")).unwrap();
        let channel = ReconnectingChannel::spawn(
            Topic::Stats,
            url,
            ChannelSettings::new(Duration::from_millis(50)),
            sink,
        );

        sleep(Duration::from_millis(400)).await;
        let state = channel.state();
        assert_eq!(state.connections, 0);
        assert_ne!(state.status, ConnectionStatus::Open);
        assert!(state.last_error.is_some());

        timeout(Duration::from_secs(2), channel.shutdown())
            .await
            .expect("shutdown is prompt")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_live_connection() {
        let mock = MockBackend::spawn().await.unwrap();
        let (sink, _rx) = collecting_sink();
        let url = Url::parse(&format!("{}/ws/stats", mock.ws_base_url())).unwrap();
        let channel = ReconnectingChannel::spawn(
            Topic::Stats,
            url,
            ChannelSettings::new(Duration::from_millis(50)),
            sink,
        );
        assert!(
            mock.wait_for_connections(Topic::Stats, 1, Duration::from_secs(2))
                .await
        );

        channel.shutdown().await.unwrap();
        assert!(
            mock.wait_for_connections_below(Topic::Stats, 1, Duration::from_secs(2))
                .await
        );
        sleep(Duration::from_millis(200)).await;
        assert_eq!(mock.total_connections(Topic::Stats), 1);
        mock.shutdown().await.unwrap();
    }
}
