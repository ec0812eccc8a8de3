//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current value of every tuning parameter keyed by name, as served by `GET /api/slider`.
pub type ParameterSnapshot = BTreeMap<String, i64>;

/// Body of `POST /api/slider`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliderUpdate {
    /// Parameter key, e.g. `hueMin`.
    pub slider_name: String,
    /// Requested value, already clamped to the parameter limit.
    pub slider_value: i64,
}

impl SliderUpdate {
    /// Construct an update for `key`.
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            slider_name: key.into(),
            slider_value: value,
        }
    }
}

/// Body of `POST /api/runConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Script identifier as listed by `GET /api/scripts`.
    pub script: String,
}

impl RunConfig {
    /// Construct a run request for `script`.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

/// Body of `POST /api/stop`, serialised as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {}

/// Body of `POST /api/submitColour`. Build it through
/// [`ColourSubmission::new`](crate::validation) so the name rules are enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColourSubmission {
    /// Identifier under which the backend stores the current thresholds.
    pub name: String,
    /// Optional display colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<[u8; 3]>,
}

/// Preview image rendered by the backend from the current thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Unmodified capture.
    Original,
    /// Capture with the colour mask applied.
    Modified,
}

impl ImageKind {
    /// Path of the image endpoint relative to the backend root.
    pub fn path(&self) -> &'static str {
        match self {
            ImageKind::Original => "/api/originalImage",
            ImageKind::Modified => "/api/modifiedImage",
        }
    }
}
