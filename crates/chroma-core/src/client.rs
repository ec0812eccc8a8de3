//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Control client orchestration and reinitialization."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Control client.
//!
//! Owns one telemetry session (hub plus one pump task per topic), the
//! parameter update channel, and the lifecycle controller. A successful
//! start tears the session down and rebuilds it against fresh backend state.
//! Parameter updates already queued survive the rebuild.

use std::collections::BTreeMap;
use std::sync::Arc;

use chroma_common::{unix_millis, ClientConfig};
use chroma_logging::{log_command_event, CommandOutcome};
use chroma_msg::topic::Topic;
use chroma_msg::{
    ColourSubmission, ControlMetricsExporter, LogLine, SemanticState, SliderUpdate, StatsSnapshot,
    ValidationError,
};
use chroma_net::{
    BackendError, ChannelSettings, ChannelState, ControlBackend, Endpoints, HttpControlBackend,
    TelemetryHub,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle::{
    ControlGates, RunState, ScriptLifecycleController, StartOutcome, TransitionError,
};
use crate::params::ParameterBoard;
use crate::updates::ConflatingUpdateChannel;
use crate::view::{ClientView, LogEntry};

const EVENT_BUFFER: usize = 256;

/// Failures surfaced by [`ControlClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("invalid client configuration: {0}")]
    Config(#[source] anyhow::Error),
    #[error("telemetry teardown failed: {0}")]
    Teardown(#[source] anyhow::Error),
}

/// Change notifications for front ends rendering the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Log(LogEntry),
    Stats(StatsSnapshot),
    Semantic(SemanticState),
    /// A viewport frame replaced the previous one.
    Frame { first: bool },
    RunState(RunState),
    /// Previews point at new cache-busted URLs.
    PreviewRefreshed { unix_millis: i64 },
    /// All telemetry state was discarded and streams reopened.
    Reinitialized,
}

struct Shared {
    view: Mutex<ClientView>,
    lifecycle: AsyncMutex<ScriptLifecycleController>,
    run_state: watch::Sender<RunState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

struct Session {
    hub: TelemetryHub,
    shutdown: watch::Sender<bool>,
    pumps: Vec<JoinHandle<()>>,
}

/// Builder for [`ControlClient`].
pub struct ControlClientBuilder {
    config: ClientConfig,
    backend: Option<Arc<dyn ControlBackend>>,
    metrics: Option<ControlMetricsExporter>,
}

impl ControlClientBuilder {
    /// Use `backend` instead of an HTTP client built from the configuration.
    pub fn backend(mut self, backend: Arc<dyn ControlBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn metrics(mut self, metrics: ControlMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Assemble the client. No connection is made until [`ControlClient::connect`].
    pub fn build(self) -> Result<ControlClient, ClientError> {
        let config = self.config;
        config.validate().map_err(ClientError::Config)?;
        let endpoints = Endpoints::new(&config.backend.base_url)?;
        let backend: Arc<dyn ControlBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpControlBackend::new(
                endpoints.clone(),
                config.backend.request_timeout,
            )?),
        };

        let mut settings = ChannelSettings::from_config(&config.streams);
        if let Some(metrics) = &self.metrics {
            settings = settings.with_metrics(metrics.clone());
        }

        let (run_state, _) = watch::channel(RunState::Idle);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared {
            view: Mutex::new(ClientView::new(config.console.clone())),
            lifecycle: AsyncMutex::new(ScriptLifecycleController::new(&config.scripts)),
            run_state,
            events,
        });

        let hook_shared = shared.clone();
        let hook_endpoints = endpoints.clone();
        let mut updates = ConflatingUpdateChannel::builder(backend.clone()).refresh(
            move |update: &SliderUpdate| {
                debug!(key = %update.slider_name, "refreshing previews");
                refresh_preview(&hook_shared, &hook_endpoints);
            },
        );
        if let Some(metrics) = self.metrics {
            updates = updates.metrics(metrics);
        }

        Ok(ControlClient {
            board: Mutex::new(ParameterBoard::from_config(&config)),
            topics: configured_topics(&config),
            config,
            endpoints,
            backend,
            settings,
            updates: updates.build(),
            shared,
            session: AsyncMutex::new(None),
        })
    }
}

fn configured_topics(config: &ClientConfig) -> Vec<Topic> {
    config
        .streams
        .topics
        .iter()
        .filter_map(|name| match name.parse::<Topic>() {
            Ok(topic) => Some(topic),
            Err(_) => {
                warn!(topic = %name, "skipping unknown stream topic");
                None
            }
        })
        .collect()
}

fn refresh_preview(shared: &Shared, endpoints: &Endpoints) {
    let now = unix_millis();
    let refreshed = shared.view.lock().preview.refresh(endpoints, now);
    match refreshed {
        Ok(()) => shared.emit(ClientEvent::PreviewRefreshed { unix_millis: now }),
        Err(err) => warn!(error = %err, "could not build preview urls"),
    }
}

/// Operator-side client of one bot backend.
pub struct ControlClient {
    config: ClientConfig,
    endpoints: Endpoints,
    backend: Arc<dyn ControlBackend>,
    settings: ChannelSettings,
    topics: Vec<Topic>,
    board: Mutex<ParameterBoard>,
    updates: ConflatingUpdateChannel,
    shared: Arc<Shared>,
    session: AsyncMutex<Option<Session>>,
}

impl ControlClient {
    pub fn builder(config: ClientConfig) -> ControlClientBuilder {
        ControlClientBuilder {
            config,
            backend: None,
            metrics: None,
        }
    }

    /// Open every configured stream and load scripts, parameters and previews.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.open_session().await?;
        self.load_backend_state().await;
        info!(backend = %self.endpoints.http_base(), "control client connected");
        Ok(())
    }

    /// Discard all telemetry-derived state and rebuild it from the backend.
    ///
    /// Queued parameter updates are left alone.
    pub async fn reinitialize(&self) -> Result<(), ClientError> {
        self.close_session().await?;
        *self.shared.view.lock() = ClientView::new(self.config.console.clone());
        {
            let mut lifecycle = self.shared.lifecycle.lock().await;
            lifecycle.reset();
            self.shared.run_state.send_replace(lifecycle.state().clone());
        }
        self.open_session().await?;
        self.load_backend_state().await;
        self.shared.emit(ClientEvent::Reinitialized);
        info!("control client reinitialized");
        Ok(())
    }

    /// Close every stream and stop delivering parameter updates.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.updates.shutdown();
        self.close_session().await
    }

    async fn open_session(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        let hub = TelemetryHub::new(
            self.endpoints.clone(),
            self.settings.clone(),
            self.config.streams.log_buffer,
        );
        let (shutdown, signal) = watch::channel(false);
        let pumps = spawn_pumps(&hub, &self.shared, &signal);
        hub.connect_all(&self.topics)?;
        *session = Some(Session {
            hub,
            shutdown,
            pumps,
        });
        Ok(())
    }

    async fn close_session(&self) -> Result<(), ClientError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        let _ = session.shutdown.send(true);
        for pump in session.pumps {
            if let Err(err) = pump.await {
                warn!(error = %err, "telemetry pump ended abnormally");
            }
        }
        session.hub.shutdown().await.map_err(ClientError::Teardown)
    }

    async fn load_backend_state(&self) {
        if let Err(err) = self.refresh_scripts().await {
            warn!(error = %err, "could not load script catalogue");
        }
        if let Err(err) = self.sync_parameters().await {
            warn!(error = %err, "could not load parameter values");
        }
        refresh_preview(&self.shared, &self.endpoints);
    }

    /// Reload the script catalogue.
    pub async fn refresh_scripts(&self) -> Result<Vec<String>, ClientError> {
        let scripts = self.backend.scripts().await?;
        let mut lifecycle = self.shared.lifecycle.lock().await;
        lifecycle.set_catalog(scripts);
        Ok(lifecycle.catalog().to_vec())
    }

    /// Adopt the backend's parameter values.
    pub async fn sync_parameters(&self) -> Result<BTreeMap<String, i64>, ClientError> {
        let snapshot = self.backend.parameters().await?;
        let mut board = self.board.lock();
        let corrected = board.apply_snapshot(&snapshot);
        if !corrected.is_empty() {
            debug!(keys = ?corrected, "parameter values adjusted to keep pairs ordered");
        }
        Ok(board.values().clone())
    }

    /// Move one parameter. Returns the update queued after pair correction.
    pub fn set_parameter(&self, key: &str, value: i64) -> Result<SliderUpdate, ClientError> {
        let update = self.board.lock().adjust(key, value)?;
        self.updates.submit(&update.slider_name, update.slider_value);
        Ok(update)
    }

    /// Validate and persist a named colour. Invalid input never reaches the backend.
    pub async fn submit_colour(&self, name: &str, rgb: Option<&[i64]>) -> Result<(), ClientError> {
        let colour = match ColourSubmission::new(name, rgb) {
            Ok(colour) => colour,
            Err(err) => {
                log_command_event(None, "colour", &err.to_string(), CommandOutcome::Failed);
                return Err(err.into());
            }
        };
        match self.backend.submit_colour(&colour).await {
            Ok(()) => {
                log_command_event(None, "colour", "colour saved", CommandOutcome::Accepted);
                Ok(())
            }
            Err(err) => {
                log_command_event(None, "colour", &err.to_string(), CommandOutcome::Failed);
                Err(err.into())
            }
        }
    }

    pub async fn select_script(&self, script: &str) -> Result<(), ClientError> {
        Ok(self.shared.lifecycle.lock().await.select(script)?)
    }

    /// Start the selected script, then reinitialize.
    pub async fn start(&self) -> Result<StartOutcome, ClientError> {
        let outcome = self
            .shared
            .lifecycle
            .lock()
            .await
            .start(self.backend.as_ref())
            .await?;
        self.after_start(&outcome).await?;
        Ok(outcome)
    }

    /// Start the inspection target, then reinitialize.
    pub async fn inspect(&self) -> Result<StartOutcome, ClientError> {
        let outcome = self
            .shared
            .lifecycle
            .lock()
            .await
            .inspect(self.backend.as_ref())
            .await?;
        self.after_start(&outcome).await?;
        Ok(outcome)
    }

    async fn after_start(&self, outcome: &StartOutcome) -> Result<(), ClientError> {
        match outcome {
            StartOutcome::Reinitialize { target } => {
                debug!(script = %target, "rebuilding client after start");
                self.reinitialize().await
            }
        }
    }

    /// Stop the running script.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let result = {
            let mut lifecycle = self.shared.lifecycle.lock().await;
            let result = lifecycle.stop(self.backend.as_ref()).await;
            self.shared.run_state.send_replace(lifecycle.state().clone());
            result
        };
        Ok(result?)
    }

    /// Run state shown to the operator.
    pub async fn run_state(&self) -> RunState {
        self.shared.lifecycle.lock().await.state().clone()
    }

    /// Follow the run state shown to the operator.
    pub fn watch_run_state(&self) -> watch::Receiver<RunState> {
        self.shared.run_state.subscribe()
    }

    pub async fn gates(&self) -> ControlGates {
        self.shared.lifecycle.lock().await.gates()
    }

    pub async fn catalog(&self) -> Vec<String> {
        self.shared.lifecycle.lock().await.catalog().to_vec()
    }

    pub async fn selection(&self) -> Option<String> {
        self.shared
            .lifecycle
            .lock()
            .await
            .selection()
            .map(str::to_owned)
    }

    /// Parameter values as shown to the operator.
    pub fn parameters(&self) -> BTreeMap<String, i64> {
        self.board.lock().values().clone()
    }

    /// Inspect the current projection without cloning it.
    pub fn with_view<R>(&self, read: impl FnOnce(&ClientView) -> R) -> R {
        read(&self.shared.view.lock())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn updates(&self) -> &ConflatingUpdateChannel {
        &self.updates
    }

    /// Stream state per open topic.
    pub async fn channel_states(&self) -> Vec<(Topic, ChannelState)> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Vec::new();
        };
        session
            .hub
            .connected_topics()
            .into_iter()
            .filter_map(|topic| session.hub.channel_state(topic).map(|state| (topic, state)))
            .collect()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

fn spawn_pumps(
    hub: &TelemetryHub,
    shared: &Arc<Shared>,
    signal: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let stats_shared = shared.clone();
    let semantic_shared = shared.clone();
    let viewport_shared = shared.clone();
    vec![
        tokio::spawn(pump_logs(hub.logs(), shared.clone(), signal.clone())),
        tokio::spawn(pump_run_state(hub.run_state(), shared.clone(), signal.clone())),
        tokio::spawn(pump_latest(hub.stats(), signal.clone(), move |stats| {
            stats_shared.view.lock().stats.apply(stats.clone());
            stats_shared.emit(ClientEvent::Stats(stats));
        })),
        tokio::spawn(pump_latest(
            hub.semantic_state(),
            signal.clone(),
            move |state| {
                semantic_shared.view.lock().semantic.apply(state.clone());
                semantic_shared.emit(ClientEvent::Semantic(state));
            },
        )),
        tokio::spawn(pump_latest(hub.viewport(), signal.clone(), move |frame| {
            let first = viewport_shared.view.lock().viewport.apply(frame);
            viewport_shared.emit(ClientEvent::Frame { first });
        })),
    ]
}

async fn pump_logs(
    mut lines: broadcast::Receiver<LogLine>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = lines.recv() => match received {
                Ok(line) => {
                    let entry = {
                        let mut view = shared.view.lock();
                        view.console.append(&line);
                        view.console.lines().last().cloned()
                    };
                    if let Some(entry) = entry {
                        shared.emit(ClientEvent::Log(entry));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "log pump fell behind; lines dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn pump_run_state(
    mut broadcasts: broadcast::Receiver<bool>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = broadcasts.recv() => match received {
                Ok(running) => {
                    let mut lifecycle = shared.lifecycle.lock().await;
                    if lifecycle.apply_broadcast(running) {
                        let state = lifecycle.state().clone();
                        shared.run_state.send_replace(state.clone());
                        shared.emit(ClientEvent::RunState(state));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "run state pump fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Apply the newest value of a latest-wins topic each time it changes.
async fn pump_latest<T, F>(
    mut latest: watch::Receiver<Option<T>>,
    mut shutdown: watch::Receiver<bool>,
    apply: F,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = latest.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = latest.borrow_and_update().clone();
                if let Some(value) = value {
                    apply(value);
                }
            }
        }
    }
}
