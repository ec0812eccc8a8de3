//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Named push stream exposed by the backend under `/ws/<name>`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Topic {
    /// Ordered, append-only bot log lines.
    Logs,
    /// `"true"`/`"false"` run-state broadcasts.
    State,
    /// Periodic counter snapshots.
    Stats,
    /// Coarse behavioural state label.
    SemanticState,
    /// Live capture frames; only the newest matters.
    Viewport,
}

impl Topic {
    /// Every topic in connection order.
    pub fn all() -> Vec<Topic> {
        Topic::iter().collect()
    }

    /// Path of the stream relative to the backend root.
    pub fn path(&self) -> String {
        format!("/ws/{}", self.as_ref())
    }
}
