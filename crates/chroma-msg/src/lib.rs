//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Request bodies, push-stream payloads and local validation shared by the
//! chroma control client and its test backend.

pub mod logging;
pub mod telemetry;
pub mod topic;
pub mod types;
pub mod validation;

use topic::Topic;

/// Raised when a push payload cannot be decoded for its topic.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload was not the JSON document the topic expects.
    #[error("malformed {topic} payload: {source}")]
    Json {
        /// Stream the payload arrived on.
        topic: Topic,
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// Payload was empty.
    #[error("empty {0} payload")]
    Empty(Topic),
}

pub use logging::{log_payload, ControlMetricsExporter, PayloadDirection};
pub use telemetry::{
    LogLevel, LogLine, SemanticState, SemanticTone, StatsSnapshot, TelemetryEvent, ViewportFrame,
};
pub use types::{ColourSubmission, ImageKind, ParameterSnapshot, RunConfig, SliderUpdate, StopRequest};
pub use validation::{validate_colour_name, validate_rgb, ValidationError};
