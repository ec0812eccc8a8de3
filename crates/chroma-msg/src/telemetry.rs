//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::topic::Topic;
use crate::DecodeError;

/// Severity attached to a bot log line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Finest grained diagnostics.
    Trace,
    /// Diagnostic output.
    Debug,
    /// Normal progress; also the fallback for plain-text lines.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure reported by the bot.
    Error,
    /// Level string the client does not recognise, kept verbatim.
    Other(String),
}

impl LogLevel {
    /// Classify a level string case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRACE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "SEVERE" => LogLevel::Error,
            _ => LogLevel::Other(raw.trim().to_owned()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => f.write_str("TRACE"),
            LogLevel::Debug => f.write_str("DEBUG"),
            LogLevel::Info => f.write_str("INFO"),
            LogLevel::Warn => f.write_str("WARN"),
            LogLevel::Error => f.write_str("ERROR"),
            LogLevel::Other(level) => f.write_str(level),
        }
    }
}

/// One line pushed on `/ws/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Severity of the line.
    pub level: LogLevel,
    /// Message body.
    pub message: String,
    /// False when the payload was not a JSON object and is shown verbatim.
    pub structured: bool,
}

impl LogLine {
    /// Parse a raw log payload. Never fails: anything that is not a JSON
    /// object becomes a plain INFO line carrying the raw text.
    pub fn parse(raw: &str) -> Self {
        let Ok(JsonValue::Object(fields)) = serde_json::from_str::<JsonValue>(raw) else {
            return Self::plain(raw);
        };
        let level = match fields.get("level") {
            Some(JsonValue::String(level)) if !level.trim().is_empty() => LogLevel::parse(level),
            _ => LogLevel::Info,
        };
        let message = match fields.get("message") {
            Some(JsonValue::String(message)) if !message.is_empty() => message.clone(),
            Some(JsonValue::Null) | None => raw.to_owned(),
            Some(JsonValue::String(_)) => raw.to_owned(),
            Some(other) => other.to_string(),
        };
        Self {
            level,
            message,
            structured: true,
        }
    }

    /// Plain-text line at INFO.
    pub fn plain(raw: &str) -> Self {
        Self {
            level: LogLevel::Info,
            message: raw.to_owned(),
            structured: false,
        }
    }

    /// Text as rendered in the console.
    pub fn render(&self) -> String {
        if self.structured {
            format!("[{}] {}", self.level, self.message)
        } else {
            self.message.clone()
        }
    }
}

/// Periodic counters pushed on `/ws/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Run time label formatted `HH:MM:SS`.
    #[serde(rename = "time")]
    pub elapsed: String,
    /// Completed bot cycles.
    pub cycles: u64,
    /// Simulated inputs sent.
    #[serde(rename = "inputs")]
    pub input_count: u64,
    /// Objects detected.
    #[serde(rename = "objects")]
    pub object_count: u64,
}

impl StatsSnapshot {
    /// Parsed form of [`StatsSnapshot::elapsed`], if well formed.
    pub fn elapsed_duration(&self) -> Option<Duration> {
        chroma_common::time::parse_hms(&self.elapsed)
    }
}

/// Display tone the backend attaches to a semantic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticTone {
    /// `primary`, used while searching.
    Primary,
    /// `success`, used while acting.
    Success,
    /// `warning`, used while waiting.
    Warning,
    /// `danger`, used on error.
    Danger,
    /// Any other style class.
    Neutral,
}

/// Coarse behavioural state pushed on `/ws/semantic-state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticState {
    /// Human readable label, e.g. `Searching`.
    pub label: String,
    /// Style class, e.g. `primary`.
    #[serde(rename = "css")]
    pub style_class: String,
}

impl SemanticState {
    /// Map the style class onto a known tone.
    pub fn tone(&self) -> SemanticTone {
        match self.style_class.trim().to_ascii_lowercase().as_str() {
            "primary" => SemanticTone::Primary,
            "success" => SemanticTone::Success,
            "warning" => SemanticTone::Warning,
            "danger" => SemanticTone::Danger,
            _ => SemanticTone::Neutral,
        }
    }
}

/// One live capture frame pushed on `/ws/viewport`. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportFrame {
    /// Self-contained encoded image, typically a `data:` URL.
    pub image_data: String,
}

impl ViewportFrame {
    /// Media type declared by a `data:` URL payload.
    pub fn media_type(&self) -> Option<&str> {
        let rest = self.image_data.strip_prefix("data:")?;
        let end = rest.find([';', ','])?;
        Some(&rest[..end])
    }
}

/// Decoded push message, tagged by the stream it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Line from `/ws/logs`.
    Log(LogLine),
    /// Snapshot from `/ws/stats`.
    Stats(StatsSnapshot),
    /// Label from `/ws/semantic-state`.
    Semantic(SemanticState),
    /// Frame from `/ws/viewport`.
    Viewport(ViewportFrame),
    /// Broadcast from `/ws/state`.
    RunState {
        /// True while the backend reports a script running.
        running: bool,
    },
}

impl TelemetryEvent {
    /// Decode a raw text payload received on `topic`.
    pub fn decode(topic: Topic, raw: &str) -> Result<Self, DecodeError> {
        match topic {
            Topic::Logs => Ok(TelemetryEvent::Log(LogLine::parse(raw))),
            // Anything other than "true" reads as not running.
            Topic::State => Ok(TelemetryEvent::RunState {
                running: raw.trim() == "true",
            }),
            Topic::Stats => serde_json::from_str(raw)
                .map(TelemetryEvent::Stats)
                .map_err(|source| DecodeError::Json { topic, source }),
            Topic::SemanticState => serde_json::from_str(raw)
                .map(TelemetryEvent::Semantic)
                .map_err(|source| DecodeError::Json { topic, source }),
            Topic::Viewport => {
                if raw.trim().is_empty() {
                    return Err(DecodeError::Empty(topic));
                }
                Ok(TelemetryEvent::Viewport(ViewportFrame {
                    image_data: raw.to_owned(),
                }))
            }
        }
    }

    /// Stream the event belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            TelemetryEvent::Log(_) => Topic::Logs,
            TelemetryEvent::Stats(_) => Topic::Stats,
            TelemetryEvent::Semantic(_) => Topic::SemanticState,
            TelemetryEvent::Viewport(_) => Topic::Viewport,
            TelemetryEvent::RunState { .. } => Topic::State,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_log_lines_keep_level() {
        let line = LogLine::parse(r#"{"level":"WARN","message":"colour not found"}"#);
        assert_eq!(line.level, LogLevel::Warn);
        assert_eq!(line.message, "colour not found");
        assert_eq!(line.render(), "[WARN] colour not found");
    }

    #[test]
    fn plain_text_falls_back_to_info() {
        let line = LogLine::parse("Bot started");
        assert_eq!(line.level, LogLevel::Info);
        assert!(!line.structured);
        assert_eq!(line.render(), "Bot started");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let raw = r#"{"message":"no level here"}"#;
        let line = LogLine::parse(raw);
        assert_eq!(line.level, LogLevel::Info);
        assert_eq!(line.message, "no level here");

        let raw = r#"{"level":"error"}"#;
        let line = LogLine::parse(raw);
        assert_eq!(line.level, LogLevel::Error);
        assert_eq!(line.message, raw);
    }

    #[test]
    fn json_scalars_are_plain_text() {
        let line = LogLine::parse("42");
        assert!(!line.structured);
        assert_eq!(line.message, "42");
    }

    #[test]
    fn unknown_levels_are_kept_verbatim() {
        let line = LogLine::parse(r#"{"level":"Notice","message":"m"}"#);
        assert_eq!(line.level, LogLevel::Other("Notice".into()));
        assert_eq!(line.render(), "[Notice] m");
    }

    #[test]
    fn stats_decode_with_backend_names() {
        let event = TelemetryEvent::decode(
            Topic::Stats,
            r#"{"time":"00:01:05","cycles":12,"inputs":30,"objects":4}"#,
        )
        .unwrap();
        let TelemetryEvent::Stats(stats) = event else {
            panic!("expected stats");
        };
        assert_eq!(stats.cycles, 12);
        assert_eq!(stats.input_count, 30);
        assert_eq!(stats.object_count, 4);
        assert_eq!(stats.elapsed_duration(), Some(Duration::from_secs(65)));
    }

    #[test]
    fn malformed_stats_are_rejected() {
        let err = TelemetryEvent::decode(Topic::Stats, "not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json { topic: Topic::Stats, .. }));
    }

    #[test]
    fn semantic_state_maps_tone() {
        let event =
            TelemetryEvent::decode(Topic::SemanticState, r#"{"label":"Acting","css":"success"}"#)
                .unwrap();
        let TelemetryEvent::Semantic(state) = event else {
            panic!("expected semantic state");
        };
        assert_eq!(state.label, "Acting");
        assert_eq!(state.tone(), SemanticTone::Success);
    }

    #[test]
    fn run_state_reads_true_only() {
        assert_eq!(
            TelemetryEvent::decode(Topic::State, "true").unwrap(),
            TelemetryEvent::RunState { running: true }
        );
        assert_eq!(
            TelemetryEvent::decode(Topic::State, "false").unwrap(),
            TelemetryEvent::RunState { running: false }
        );
        assert_eq!(
            TelemetryEvent::decode(Topic::State, "garbage").unwrap(),
            TelemetryEvent::RunState { running: false }
        );
    }

    #[test]
    fn viewport_frames_are_opaque() {
        let event =
            TelemetryEvent::decode(Topic::Viewport, "data:image/png;base64,iVBORw0KGgo=").unwrap();
        let TelemetryEvent::Viewport(frame) = event else {
            panic!("expected viewport frame");
        };
        assert_eq!(frame.media_type(), Some("image/png"));
        assert!(TelemetryEvent::decode(Topic::Viewport, "  ").is_err());
    }
}
