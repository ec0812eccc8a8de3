//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Backend connectivity for the control client."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! HTTP requests and push-stream subscriptions against the bot backend.

pub mod channel;
pub mod hub;
pub mod rest;

pub use channel::{
    ChannelSettings, ChannelState, ConnectionStatus, MessageSink, ReconnectingChannel,
};
pub use hub::TelemetryHub;
pub use rest::{BackendError, ControlBackend, Endpoints, HttpControlBackend};
