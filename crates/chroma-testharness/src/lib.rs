//! ---
//! chroma_section: "15-testing-qa-runbook"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Mock bot backend used by the workspace test suites."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! In-process stand-in for the bot backend.
//!
//! Serves the `/api` endpoints and every `/ws/<topic>` stream on an
//! ephemeral port, records what it receives, and exposes knobs for
//! latency, refusals and forced socket closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chroma_common::time::format_hms;
use chroma_msg::topic::Topic;
use chroma_msg::{ColourSubmission, ImageKind, ParameterSnapshot, RunConfig, SliderUpdate};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const STREAM_BUFFER: usize = 256;

/// Initial contents of the mock backend.
#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Raw script listing, including reserved identifiers.
    pub scripts: Vec<String>,
    /// Parameter values served by `GET /api/slider`.
    pub parameters: ParameterSnapshot,
    /// Artificial latency of every `POST /api/slider`.
    pub slider_delay: Duration,
    /// Push the current run state to each new `/ws/state` subscriber. Off by
    /// default: the real backend only broadcasts transitions.
    pub announce_state_on_connect: bool,
}

impl Default for MockSettings {
    fn default() -> Self {
        let parameters = [
            ("hueMin", 5),
            ("hueMax", 40),
            ("satMin", 0),
            ("satMax", 255),
            ("valMin", 0),
            ("valMax", 255),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();
        Self {
            scripts: vec![
                "DemoMiner.java".to_owned(),
                "package-info.java".to_owned(),
                "Screenshotter.java".to_owned(),
                "WoodCutter.java".to_owned(),
            ],
            parameters,
            slider_delay: Duration::ZERO,
            announce_state_on_connect: false,
        }
    }
}

/// One HTTP request as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: &'static str,
    /// Request path without query.
    pub path: String,
}

#[derive(Default)]
struct StreamCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

#[derive(Default)]
struct InFlight {
    per_key: HashMap<String, usize>,
    peak_per_key: HashMap<String, usize>,
    total: usize,
    peak_total: usize,
}

struct MockState {
    scripts: Vec<String>,
    parameters: Mutex<ParameterSnapshot>,
    slider_delay: Mutex<Duration>,
    fail_sliders: AtomicBool,
    fail_commands: AtomicBool,
    running: AtomicBool,
    announce_state_on_connect: bool,
    requests: Mutex<Vec<RecordedRequest>>,
    slider_updates: Mutex<Vec<SliderUpdate>>,
    in_flight: Mutex<InFlight>,
    run_configs: Mutex<Vec<RunConfig>>,
    colours: Mutex<Vec<ColourSubmission>>,
    streams: HashMap<Topic, broadcast::Sender<String>>,
    counters: HashMap<Topic, StreamCounters>,
    kick: broadcast::Sender<Topic>,
}

impl MockState {
    fn record(&self, method: &'static str, path: &str) {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_owned(),
        });
    }

    fn publish(&self, topic: Topic, payload: String) -> usize {
        self.streams
            .get(&topic)
            .and_then(|sender| sender.send(payload).ok())
            .unwrap_or(0)
    }

    fn counters(&self, topic: Topic) -> &StreamCounters {
        &self.counters[&topic]
    }
}

/// Running mock backend.
pub struct MockBackend {
    address: SocketAddr,
    state: Arc<MockState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MockBackend {
    /// Spawn with [`MockSettings::default`].
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(MockSettings::default()).await
    }

    /// Spawn on an ephemeral localhost port.
    pub async fn spawn_with(settings: MockSettings) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;

        let (kick, _) = broadcast::channel(16);
        let state = Arc::new(MockState {
            scripts: settings.scripts,
            parameters: Mutex::new(settings.parameters),
            slider_delay: Mutex::new(settings.slider_delay),
            fail_sliders: AtomicBool::new(false),
            fail_commands: AtomicBool::new(false),
            running: AtomicBool::new(false),
            announce_state_on_connect: settings.announce_state_on_connect,
            requests: Mutex::new(Vec::new()),
            slider_updates: Mutex::new(Vec::new()),
            in_flight: Mutex::new(InFlight::default()),
            run_configs: Mutex::new(Vec::new()),
            colours: Mutex::new(Vec::new()),
            streams: Topic::all()
                .into_iter()
                .map(|topic| (topic, broadcast::channel(STREAM_BUFFER).0))
                .collect(),
            counters: Topic::all()
                .into_iter()
                .map(|topic| (topic, StreamCounters::default()))
                .collect(),
            kick,
        });

        let router = Router::new()
            .route("/api/slider", post(post_slider).get(get_slider))
            .route("/api/submitColour", post(post_colour))
            .route("/api/scripts", get(get_scripts))
            .route("/api/runConfig", post(post_run_config))
            .route("/api/stop", post(post_stop))
            .route("/api/originalImage", get(get_original_image))
            .route("/api/modifiedImage", get(get_modified_image))
            .route("/ws/:topic", get(upgrade_stream))
            .with_state(state.clone());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "mock backend exited with error");
            }
        });
        info!(address = %address, "mock backend listening");

        Ok(Self {
            address,
            state,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// `http://` root of the mock.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// `ws://` root of the mock.
    pub fn ws_base_url(&self) -> String {
        format!("ws://{}", self.address)
    }

    /// Push `payload` to every subscriber of `topic`. Returns subscribers reached.
    pub fn publish(&self, topic: Topic, payload: impl Into<String>) -> usize {
        self.state.publish(topic, payload.into())
    }

    /// Push a JSON log line.
    pub fn publish_log(&self, level: &str, message: &str) -> usize {
        self.publish(
            Topic::Logs,
            json!({"level": level, "message": message}).to_string(),
        )
    }

    /// Push a stats snapshot in the backend's wire format.
    pub fn publish_stats(&self, elapsed: Duration, cycles: u64, inputs: u64, objects: u64) -> usize {
        self.publish(
            Topic::Stats,
            json!({
                "time": format_hms(elapsed),
                "cycles": cycles,
                "inputs": inputs,
                "objects": objects,
            })
            .to_string(),
        )
    }

    /// Push a semantic state label.
    pub fn publish_semantic(&self, label: &str, css: &str) -> usize {
        self.publish(
            Topic::SemanticState,
            json!({"label": label, "css": css}).to_string(),
        )
    }

    /// Close every live socket of `topic` with a close frame.
    pub fn drop_connections(&self, topic: Topic) {
        let _ = self.state.kick.send(topic);
    }

    /// Sockets currently open on `topic`.
    pub fn live_connections(&self, topic: Topic) -> usize {
        self.state.counters(topic).live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sockets on `topic`.
    pub fn peak_connections(&self, topic: Topic) -> usize {
        self.state.counters(topic).peak.load(Ordering::SeqCst)
    }

    /// Sockets ever accepted on `topic`.
    pub fn total_connections(&self, topic: Topic) -> usize {
        self.state.counters(topic).total.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` sockets are open on `topic`.
    pub async fn wait_for_connections(&self, topic: Topic, count: usize, within: Duration) -> bool {
        self.wait_until(within, || self.live_connections(topic) >= count)
            .await
    }

    /// Wait until fewer than `count` sockets are open on `topic`.
    pub async fn wait_for_connections_below(
        &self,
        topic: Topic,
        count: usize,
        within: Duration,
    ) -> bool {
        self.wait_until(within, || self.live_connections(topic) < count)
            .await
    }

    /// Poll `condition` every few milliseconds until it holds or `within` elapses.
    pub async fn wait_until(&self, within: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Change the latency of `POST /api/slider`.
    pub fn set_slider_delay(&self, delay: Duration) {
        *self.state.slider_delay.lock() = delay;
    }

    /// Answer `POST /api/slider` with 500.
    pub fn fail_sliders(&self, fail: bool) {
        self.state.fail_sliders.store(fail, Ordering::SeqCst);
    }

    /// Answer `POST /api/runConfig` and `POST /api/stop` with 500.
    pub fn fail_commands(&self, fail: bool) {
        self.state.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Flip the run state and broadcast it, as a script finishing would.
    pub fn set_running(&self, running: bool) {
        self.state.running.store(running, Ordering::SeqCst);
        self.publish(Topic::State, running.to_string());
    }

    /// Whether a script is running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Current parameter values.
    pub fn parameters(&self) -> ParameterSnapshot {
        self.state.parameters.lock().clone()
    }

    /// Every HTTP request received, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of HTTP requests received.
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// Every `POST /api/slider` body, in arrival order.
    pub fn slider_requests(&self) -> Vec<SliderUpdate> {
        self.state.slider_updates.lock().clone()
    }

    /// Highest number of concurrent `POST /api/slider` requests for `key`.
    pub fn peak_in_flight(&self, key: &str) -> usize {
        self.state
            .in_flight
            .lock()
            .peak_per_key
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent `POST /api/slider` requests overall.
    pub fn peak_in_flight_total(&self) -> usize {
        self.state.in_flight.lock().peak_total
    }

    /// Every accepted `POST /api/runConfig` body.
    pub fn run_configs(&self) -> Vec<RunConfig> {
        self.state.run_configs.lock().clone()
    }

    /// Every `POST /api/submitColour` body.
    pub fn colours(&self) -> Vec<ColourSubmission> {
        self.state.colours.lock().clone()
    }

    /// Close all sockets, stop the server and wait for it.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        for topic in Topic::all() {
            self.drop_connections(topic);
        }
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

struct InFlightGuard {
    state: Arc<MockState>,
    key: String,
}

impl InFlightGuard {
    fn enter(state: Arc<MockState>, key: &str) -> Self {
        {
            let mut in_flight = state.in_flight.lock();
            let current = in_flight.per_key.entry(key.to_owned()).or_default();
            *current += 1;
            let current = *current;
            let peak = in_flight.peak_per_key.entry(key.to_owned()).or_default();
            *peak = (*peak).max(current);
            in_flight.total += 1;
            in_flight.peak_total = in_flight.peak_total.max(in_flight.total);
        }
        Self {
            state,
            key: key.to_owned(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.state.in_flight.lock();
        if let Some(current) = in_flight.per_key.get_mut(&self.key) {
            *current = current.saturating_sub(1);
        }
        in_flight.total = in_flight.total.saturating_sub(1);
    }
}

async fn post_slider(
    State(state): State<Arc<MockState>>,
    Json(update): Json<SliderUpdate>,
) -> StatusCode {
    state.record("POST", "/api/slider");
    state.slider_updates.lock().push(update.clone());
    let _guard = InFlightGuard::enter(state.clone(), &update.slider_name);

    let delay = *state.slider_delay.lock();
    if !delay.is_zero() {
        sleep(delay).await;
    }
    if state.fail_sliders.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state
        .parameters
        .lock()
        .insert(update.slider_name, update.slider_value);
    StatusCode::OK
}

async fn get_slider(State(state): State<Arc<MockState>>) -> Json<ParameterSnapshot> {
    state.record("GET", "/api/slider");
    Json(state.parameters.lock().clone())
}

async fn post_colour(
    State(state): State<Arc<MockState>>,
    Json(colour): Json<ColourSubmission>,
) -> StatusCode {
    state.record("POST", "/api/submitColour");
    state.colours.lock().push(colour);
    StatusCode::OK
}

async fn get_scripts(State(state): State<Arc<MockState>>) -> Json<Vec<String>> {
    state.record("GET", "/api/scripts");
    Json(state.scripts.clone())
}

async fn post_run_config(
    State(state): State<Arc<MockState>>,
    Json(config): Json<RunConfig>,
) -> StatusCode {
    state.record("POST", "/api/runConfig");
    if state.fail_commands.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.run_configs.lock().push(config);
    state.running.store(true, Ordering::SeqCst);
    state.publish(Topic::State, "true".to_owned());
    StatusCode::OK
}

async fn post_stop(
    State(state): State<Arc<MockState>>,
    Json(_body): Json<serde_json::Value>,
) -> StatusCode {
    state.record("POST", "/api/stop");
    if state.fail_commands.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.running.store(false, Ordering::SeqCst);
    state.publish(Topic::State, "false".to_owned());
    StatusCode::OK
}

async fn get_original_image(State(state): State<Arc<MockState>>) -> Response {
    image_response(&state, ImageKind::Original)
}

async fn get_modified_image(State(state): State<Arc<MockState>>) -> Response {
    image_response(&state, ImageKind::Modified)
}

fn image_response(state: &MockState, kind: ImageKind) -> Response {
    state.record("GET", kind.path());
    // PNG signature only; callers treat the body as opaque.
    let body = Body::from(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    ([(header::CONTENT_TYPE, "image/png")], body).into_response()
}

async fn upgrade_stream(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(state): State<Arc<MockState>>,
) -> Response {
    let Ok(topic) = topic.parse::<Topic>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| stream_loop(socket, topic, state))
}

struct LiveGuard {
    state: Arc<MockState>,
    topic: Topic,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.state
            .counters(self.topic)
            .live
            .fetch_sub(1, Ordering::SeqCst);
    }
}

async fn stream_loop(mut socket: WebSocket, topic: Topic, state: Arc<MockState>) {
    let mut feed = state.streams[&topic].subscribe();
    let mut kick = state.kick.subscribe();

    let counters = state.counters(topic);
    let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
    counters.total.fetch_add(1, Ordering::SeqCst);
    counters.peak.fetch_max(live, Ordering::SeqCst);
    let _guard = LiveGuard {
        state: state.clone(),
        topic,
    };
    debug!(topic = %topic, live, "mock stream subscriber connected");

    if topic == Topic::State && state.announce_state_on_connect {
        let running = state.running.load(Ordering::SeqCst);
        if socket.send(Message::Text(running.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            payload = feed.recv() => match payload {
                Ok(payload) => {
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "mock stream subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            kicked = kick.recv() => match kicked {
                Ok(kicked) if kicked == topic => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "closed by mock backend".into(),
                        })))
                        .await;
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(topic = %topic, "mock stream subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_parameters_and_records_requests() {
        let mock = MockBackend::spawn().await.unwrap();
        let client = reqwest::Client::new();
        let base = mock.base_url();

        let parameters: ParameterSnapshot = client
            .get(format!("{base}/api/slider"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(parameters["hueMax"], 40);

        let status = client
            .post(format!("{base}/api/slider"))
            .json(&SliderUpdate::new("satMin", 9))
            .send()
            .await
            .unwrap()
            .status();
        assert!(status.is_success());
        assert_eq!(mock.parameters()["satMin"], 9);
        assert_eq!(mock.peak_in_flight("satMin"), 1);

        let image = client
            .get(format!("{base}/api/modifiedImage?t=42"))
            .send()
            .await
            .unwrap();
        assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");

        assert_eq!(
            mock.requests()
                .iter()
                .map(|request| request.path.as_str())
                .collect::<Vec<_>>(),
            vec!["/api/slider", "/api/slider", "/api/modifiedImage"]
        );
        mock.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn refuses_sliders_on_demand() {
        let mock = MockBackend::spawn().await.unwrap();
        mock.fail_sliders(true);
        let status = reqwest::Client::new()
            .post(format!("{}/api/slider", mock.base_url()))
            .json(&SliderUpdate::new("hueMin", 1))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.parameters()["hueMin"], 5);
        mock.shutdown().await.unwrap();
    }
}
