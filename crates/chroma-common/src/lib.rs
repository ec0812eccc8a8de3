//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Shared primitives and utilities for the control client."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Core shared primitives for the chroma control-plane workspace.
//! This crate exposes configuration loading, tracing bootstrap and time
//! helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    BackendConfig, ClientConfig, ConsoleConfig, LoadedClientConfig, LoggingConfig,
    ParameterPairConfig, ScriptsConfig, StreamsConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{format_hms, parse_hms, unix_millis};
