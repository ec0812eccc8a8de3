//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Control client core: conflation, lifecycle and projection."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Parameter conflation, script lifecycle and telemetry projection for the
//! chroma control client.

pub mod client;
pub mod lifecycle;
pub mod params;
pub mod updates;
pub mod view;

pub use client::{ClientError, ClientEvent, ControlClient, ControlClientBuilder};
pub use lifecycle::{
    ControlGates, RunState, ScriptLifecycleController, StartOutcome, TransitionError,
};
pub use params::{Bound, ParameterBoard};
pub use updates::{ConflatingUpdateChannel, PendingUpdate, RefreshHook, UpdateChannelBuilder};
pub use view::{
    ClientView, ImagePreview, LogConsole, LogEntry, SemanticBadge, StatsPanel, ViewportPane,
};
