//! ---
//! chroma_section: "03-persistence-logging"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Context-enriched logging helpers."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Telemetry topic the event relates to.
    pub topic: Option<&'a str>,
    /// Parameter key the event relates to.
    pub key: Option<&'a str>,
    /// Remote endpoint involved in the event.
    pub url: Option<&'a str>,
    /// Connection attempt or sequence number.
    pub attempt: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a telemetry topic.
    pub fn with_topic(mut self, topic: &'a str) -> Self {
        self.topic = Some(topic);
        self
    }

    /// Attach a parameter key.
    pub fn with_key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach a remote endpoint.
    pub fn with_url(mut self, url: &'a str) -> Self {
        self.url = Some(url);
        self
    }

    /// Attach an attempt counter.
    pub fn with_attempt(mut self, attempt: u64) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// High-level outcome used when emitting operator command events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The backend accepted the command.
    Accepted,
    /// The command was rejected locally or failed in transit.
    Failed,
}

impl CommandOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Accepted => "accepted",
            CommandOutcome::Failed => "failed",
        }
    }
}

/// Emit a standardized operator command event with an outcome.
pub fn log_command_event(
    context: Option<&LogContext>,
    command: &str,
    message: &str,
    outcome: CommandOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        CommandOutcome::Accepted => tracing::event!(
            Level::INFO,
            command,
            outcome = outcome.as_str(),
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            message = %message
        ),
        CommandOutcome::Failed => tracing::event!(
            Level::WARN,
            command,
            outcome = outcome.as_str(),
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_topic("viewport")
            .with_url("ws://127.0.0.1:1/ws/viewport");
        chroma_info!(context = ctx.clone(), "stream online");
        chroma_debug!("debug message");
        chroma_warn!(context = ctx.with_attempt(3), "retrying in {} ms", 2000);
    }

    #[test]
    fn init_does_not_panic() {
        init();
    }

    #[test]
    fn command_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_key("hueMin");
        log_command_event(
            Some(&ctx),
            "slider",
            "parameter accepted",
            CommandOutcome::Accepted,
        );
        log_command_event(None, "start", "no script selected", CommandOutcome::Failed);
    }
}
