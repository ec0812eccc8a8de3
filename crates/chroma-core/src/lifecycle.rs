//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Script run state machine and control gating."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Script lifecycle.
//!
//! The backend owns the run state. The controller keeps two copies: the
//! confirmed state, written only by `/ws/state` broadcasts, and a local
//! state that also reflects commands the operator just issued. Displays
//! read the local state; gating reads both, so an optimistic stop never
//! re-opens the start action before the backend has confirmed it.
//!
//! The backend only broadcasts on transitions. Until the first broadcast
//! arrives the confirmed state is a guess, and stop stays available.

use std::fmt;

use chroma_common::ScriptsConfig;
use chroma_logging::{log_command_event, CommandOutcome, LogContext};
use chroma_msg::{RunConfig, ValidationError};
use chroma_net::{BackendError, ControlBackend};
use serde::Serialize;
use tracing::debug;

/// Run state of the single automation slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running {
        /// Script started from this client, unknown when the run began elsewhere.
        target: Option<String>,
    },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            RunState::Running { target } => target.as_deref(),
            RunState::Idle => None,
        }
    }

    /// `Idle -> Running`.
    pub fn start(&self, target: impl Into<String>) -> Result<RunState, TransitionError> {
        match self {
            RunState::Idle => Ok(RunState::Running {
                target: Some(target.into()),
            }),
            RunState::Running { target } => Err(TransitionError::AlreadyRunning {
                target: target.clone(),
            }),
        }
    }

    /// `Running -> Idle`.
    pub fn stop(&self) -> Result<RunState, TransitionError> {
        match self {
            RunState::Running { .. } => Ok(RunState::Idle),
            RunState::Idle => Err(TransitionError::NotRunning),
        }
    }

    /// State implied by an authoritative broadcast. A running broadcast keeps
    /// a known target, otherwise it falls back to `hint`.
    pub fn observe(&self, running: bool, hint: Option<&str>) -> RunState {
        match (self, running) {
            (_, false) => RunState::Idle,
            (RunState::Running { target }, true) => RunState::Running {
                target: target.clone().or_else(|| hint.map(str::to_owned)),
            },
            (RunState::Idle, true) => RunState::Running {
                target: hint.map(str::to_owned),
            },
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running { target: Some(target) } => write!(f, "running {target}"),
            RunState::Running { target: None } => f.write_str("running"),
        }
    }
}

/// Reasons a lifecycle command is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("a script is already running")]
    AlreadyRunning { target: Option<String> },
    #[error("no script is running")]
    NotRunning,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("backend refused the command: {0}")]
    Backend(#[from] BackendError),
}

/// Which operator actions are currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlGates {
    pub selection_enabled: bool,
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub inspection_enabled: bool,
}

/// Result of an accepted start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The run began; the whole client must be rebuilt against fresh state.
    Reinitialize { target: String },
}

/// State machine for the one script the backend can run at a time.
#[derive(Debug, Clone)]
pub struct ScriptLifecycleController {
    confirmed: RunState,
    local: RunState,
    /// Set once a broadcast has reported the run state.
    observed: bool,
    catalog: Vec<String>,
    selection: Option<String>,
    hidden: Vec<String>,
    inspection_target: String,
    last_target: Option<String>,
}

impl ScriptLifecycleController {
    pub fn new(config: &ScriptsConfig) -> Self {
        Self {
            confirmed: RunState::Idle,
            local: RunState::Idle,
            observed: false,
            catalog: Vec::new(),
            selection: None,
            hidden: config.hidden.clone(),
            inspection_target: config.inspection_target.clone(),
            last_target: None,
        }
    }

    /// State shown to the operator.
    pub fn state(&self) -> &RunState {
        &self.local
    }

    /// State last broadcast by the backend.
    pub fn confirmed(&self) -> &RunState {
        &self.confirmed
    }

    /// Whether the backend has reported its run state since this controller
    /// was created.
    pub fn state_known(&self) -> bool {
        self.observed
    }

    /// Target of the most recent accepted start, kept across reinitialization.
    pub fn last_target(&self) -> Option<&str> {
        self.last_target.as_deref()
    }

    pub fn inspection_target(&self) -> &str {
        &self.inspection_target
    }

    fn running(&self) -> bool {
        self.local.is_running() || self.confirmed.is_running()
    }

    /// Replace the catalogue with the backend listing, minus reserved entries.
    ///
    /// A selection that is no longer offered is dropped.
    pub fn set_catalog(&mut self, scripts: Vec<String>) {
        self.catalog = scripts
            .into_iter()
            .filter(|script| {
                !self.hidden.iter().any(|hidden| hidden == script)
                    && *script != self.inspection_target
            })
            .collect();
        if let Some(selected) = &self.selection {
            if !self.catalog.contains(selected) {
                debug!(script = %selected, "selection no longer offered");
                self.selection = None;
            }
        }
    }

    /// Selectable scripts in backend order.
    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Choose the script the next start will run. Refused while running.
    pub fn select(&mut self, script: &str) -> Result<(), TransitionError> {
        if self.running() {
            return Err(TransitionError::AlreadyRunning {
                target: self.local.target().map(str::to_owned),
            });
        }
        if !self.catalog.iter().any(|entry| entry == script) {
            return Err(ValidationError::UnknownScript(script.to_owned()).into());
        }
        self.selection = Some(script.to_owned());
        Ok(())
    }

    pub fn gates(&self) -> ControlGates {
        let running = self.running();
        ControlGates {
            selection_enabled: !running,
            start_enabled: !running && self.selection.is_some(),
            stop_enabled: running || !self.observed,
            inspection_enabled: !running,
        }
    }

    /// Start the selected script.
    ///
    /// Nothing is sent when no script is selected or one is already running.
    pub async fn start(
        &mut self,
        backend: &dyn ControlBackend,
    ) -> Result<StartOutcome, TransitionError> {
        let config = match RunConfig::from_selection(self.selection.as_deref()) {
            Ok(config) => config,
            Err(err) => {
                log_command_event(None, "start", &err.to_string(), CommandOutcome::Failed);
                return Err(err.into());
            }
        };
        self.launch(config, backend).await
    }

    /// Start the inspection target regardless of the selection.
    pub async fn inspect(
        &mut self,
        backend: &dyn ControlBackend,
    ) -> Result<StartOutcome, TransitionError> {
        let config = RunConfig::new(self.inspection_target.clone());
        self.launch(config, backend).await
    }

    async fn launch(
        &mut self,
        config: RunConfig,
        backend: &dyn ControlBackend,
    ) -> Result<StartOutcome, TransitionError> {
        let ctx = LogContext::new().with_key(&config.script);
        if self.running() {
            let err = TransitionError::AlreadyRunning {
                target: self.local.target().map(str::to_owned),
            };
            log_command_event(Some(&ctx), "start", &err.to_string(), CommandOutcome::Failed);
            return Err(err);
        }
        let next = self.local.start(config.script.clone())?;

        if let Err(err) = backend.start_script(&config).await {
            log_command_event(Some(&ctx), "start", &err.to_string(), CommandOutcome::Failed);
            return Err(err.into());
        }
        log_command_event(Some(&ctx), "start", "script started", CommandOutcome::Accepted);
        self.local = next;
        self.last_target = Some(config.script.clone());
        Ok(StartOutcome::Reinitialize {
            target: config.script,
        })
    }

    /// Stop the running script.
    ///
    /// The local state turns idle before the request is sent and stays idle if
    /// the request fails; the next broadcast settles it. Refused only when
    /// the backend is known to be idle.
    pub async fn stop(&mut self, backend: &dyn ControlBackend) -> Result<(), TransitionError> {
        let next = match (self.local.stop(), self.confirmed.stop()) {
            (Ok(next), _) | (_, Ok(next)) => next,
            (Err(_), Err(_)) if !self.observed => {
                debug!("run state not reported yet, sending stop");
                RunState::Idle
            }
            (Err(err), Err(_)) => {
                log_command_event(None, "stop", &err.to_string(), CommandOutcome::Failed);
                return Err(err);
            }
        };
        self.local = next;

        match backend.stop_script().await {
            Ok(()) => {
                log_command_event(None, "stop", "stop requested", CommandOutcome::Accepted);
                Ok(())
            }
            Err(err) => {
                log_command_event(None, "stop", &err.to_string(), CommandOutcome::Failed);
                Err(err.into())
            }
        }
    }

    /// Fold in an authoritative run-state broadcast.
    ///
    /// Returns `false` when the run state did not change, which is the case
    /// for any broadcast repeating the state already shown.
    pub fn apply_broadcast(&mut self, running: bool) -> bool {
        let reported = self.confirmed.observe(running, self.last_target.as_deref());
        self.observed = true;
        if reported == self.confirmed && reported == self.local {
            return false;
        }
        debug!(from = %self.local, to = %reported, "run state broadcast applied");
        self.confirmed = reported.clone();
        self.local = reported;
        true
    }

    /// Forget catalogue and selection ahead of a reinitialization.
    ///
    /// The run state survives: a start that triggered the rebuild stays
    /// running until a broadcast says otherwise.
    pub fn reset(&mut self) {
        self.catalog.clear();
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chroma_msg::{ColourSubmission, ParameterSnapshot, SliderUpdate};

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
        refuse: AtomicBool,
    }

    impl CountingBackend {
        fn answer(&self, endpoint: &'static str) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(BackendError::Status {
                    endpoint,
                    status: 500,
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ControlBackend for CountingBackend {
        async fn update_parameter(&self, _update: &SliderUpdate) -> Result<(), BackendError> {
            self.answer("/api/slider")
        }

        async fn parameters(&self) -> Result<ParameterSnapshot, BackendError> {
            self.answer("/api/slider").map(|_| ParameterSnapshot::new())
        }

        async fn submit_colour(&self, _colour: &ColourSubmission) -> Result<(), BackendError> {
            self.answer("/api/submitColour")
        }

        async fn scripts(&self) -> Result<Vec<String>, BackendError> {
            self.answer("/api/scripts").map(|_| Vec::new())
        }

        async fn start_script(&self, _config: &RunConfig) -> Result<(), BackendError> {
            self.answer("/api/runConfig")
        }

        async fn stop_script(&self) -> Result<(), BackendError> {
            self.answer("/api/stop")
        }
    }

    fn controller() -> ScriptLifecycleController {
        let mut controller = ScriptLifecycleController::new(&ScriptsConfig::default());
        controller.set_catalog(vec![
            "package-info.java".into(),
            "DemoMiner.java".into(),
            "Screenshotter.java".into(),
            "WoodCutter.java".into(),
        ]);
        controller
    }

    #[test]
    fn transitions_are_validated() {
        let running = RunState::Idle.start("DemoMiner.java").unwrap();
        assert_eq!(running.target(), Some("DemoMiner.java"));
        assert!(matches!(
            running.start("WoodCutter.java"),
            Err(TransitionError::AlreadyRunning { .. })
        ));
        assert_eq!(running.stop().unwrap(), RunState::Idle);
        assert!(matches!(RunState::Idle.stop(), Err(TransitionError::NotRunning)));
        assert_eq!(
            RunState::Idle.observe(true, Some("WoodCutter.java")),
            RunState::Running {
                target: Some("WoodCutter.java".into())
            }
        );
    }

    #[test]
    fn catalogue_hides_reserved_scripts() {
        let controller = controller();
        assert_eq!(controller.catalog(), ["DemoMiner.java", "WoodCutter.java"]);
    }

    #[tokio::test]
    async fn start_without_selection_sends_nothing() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        let err = controller.start(&backend).await.unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Invalid(ValidationError::NoScriptSelected)
        ));
        assert_eq!(err.to_string(), "Please select a script.");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(!controller.gates().start_enabled);
    }

    #[tokio::test]
    async fn accepted_start_requests_reinitialization_and_gates_controls() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        controller.select("DemoMiner.java").unwrap();
        assert!(controller.gates().start_enabled);

        let outcome = controller.start(&backend).await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Reinitialize {
                target: "DemoMiner.java".into()
            }
        );
        let gates = controller.gates();
        assert!(!gates.selection_enabled && !gates.start_enabled && !gates.inspection_enabled);
        assert!(gates.stop_enabled);
        assert!(controller.select("WoodCutter.java").is_err());
        assert!(matches!(
            controller.inspect(&backend).await,
            Err(TransitionError::AlreadyRunning { .. })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_start_leaves_state_idle() {
        let backend = CountingBackend::default();
        backend.refuse.store(true, Ordering::SeqCst);
        let mut controller = controller();
        controller.select("WoodCutter.java").unwrap();
        assert!(matches!(
            controller.start(&backend).await,
            Err(TransitionError::Backend(_))
        ));
        assert_eq!(controller.state(), &RunState::Idle);
        assert!(controller.last_target().is_none());
    }

    #[tokio::test]
    async fn stop_is_optimistic_and_confirmed_by_broadcast() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        assert!(controller.apply_broadcast(true));
        assert!(controller.state().is_running());

        backend.refuse.store(true, Ordering::SeqCst);
        assert!(controller.stop(&backend).await.is_err());
        assert_eq!(controller.state(), &RunState::Idle);
        // Still confirmed running, so starting stays gated.
        assert!(!controller.gates().inspection_enabled);

        assert!(controller.apply_broadcast(false));
        assert!(controller.gates().inspection_enabled);
    }

    #[test]
    fn repeated_broadcasts_are_no_ops() {
        let mut controller = controller();
        assert!(!controller.apply_broadcast(false));
        assert!(controller.apply_broadcast(true));
        let gates = controller.gates();
        let state = controller.state().clone();
        assert!(!controller.apply_broadcast(true));
        assert_eq!(controller.gates(), gates);
        assert_eq!(controller.state(), &state);
    }

    #[tokio::test]
    async fn inspection_runs_reserved_target() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        let outcome = controller.inspect(&backend).await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Reinitialize {
                target: "Screenshotter.java".into()
            }
        );
        controller.reset();
        assert_eq!(controller.state().target(), Some("Screenshotter.java"));
        assert!(!controller.gates().selection_enabled);
        controller.apply_broadcast(true);
        assert!(!controller.apply_broadcast(true));
        assert_eq!(controller.confirmed().target(), Some("Screenshotter.java"));
    }

    #[tokio::test]
    async fn reset_keeps_an_accepted_run() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        controller.select("DemoMiner.java").unwrap();
        controller.start(&backend).await.unwrap();

        controller.reset();
        controller.set_catalog(vec!["DemoMiner.java".into(), "WoodCutter.java".into()]);
        assert_eq!(
            controller.state(),
            &RunState::Running {
                target: Some("DemoMiner.java".into())
            }
        );
        let gates = controller.gates();
        assert!(!gates.selection_enabled && !gates.inspection_enabled && gates.stop_enabled);
        assert!(matches!(
            controller.inspect(&backend).await,
            Err(TransitionError::AlreadyRunning { .. })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        controller.stop(&backend).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.state(), &RunState::Idle);
    }

    #[tokio::test]
    async fn stop_is_sent_until_the_backend_reports_idle() {
        let backend = CountingBackend::default();
        let mut controller = controller();
        assert!(!controller.state_known());
        assert!(controller.gates().stop_enabled);
        controller.stop(&backend).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), &RunState::Idle);

        assert!(!controller.apply_broadcast(false));
        assert!(controller.state_known());
        assert!(!controller.gates().stop_enabled);
        assert!(matches!(
            controller.stop(&backend).await,
            Err(TransitionError::NotRunning)
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
