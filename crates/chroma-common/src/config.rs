//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Shared primitives and utilities for the control client."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Stream names understood by the backend, in connection order.
pub const KNOWN_TOPICS: [&str; 5] = ["logs", "state", "stats", "semantic-state", "viewport"];

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_buffer() -> usize {
    1024
}

fn default_topics() -> Vec<String> {
    KNOWN_TOPICS.iter().map(|topic| (*topic).to_owned()).collect()
}

fn default_scroll_threshold() -> u32 {
    20
}

fn default_line_height() -> u32 {
    18
}

fn default_viewport_height() -> u32 {
    360
}

fn default_max_lines() -> usize {
    10_000
}

fn default_hidden_scripts() -> Vec<String> {
    vec!["package-info.java".to_owned(), "Screenshotter.java".to_owned()]
}

fn default_inspection_target() -> String {
    "Screenshotter.java".to_owned()
}

fn default_parameter_pairs() -> IndexMap<String, ParameterPairConfig> {
    let mut pairs = IndexMap::new();
    pairs.insert("hue".to_owned(), ParameterPairConfig::new("hueMin", "hueMax", 179));
    pairs.insert("sat".to_owned(), ParameterPairConfig::new("satMin", "satMax", 255));
    pairs.insert("val".to_owned(), ParameterPairConfig::new("valMin", "valMax", 255));
    pairs
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the control client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default = "default_parameter_pairs")]
    pub parameters: IndexMap<String, ParameterPairConfig>,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`ClientConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedClientConfig {
    pub config: ClientConfig,
    pub source: Option<PathBuf>,
}

impl ClientConfig {
    pub const ENV_CONFIG_PATH: &str = "CHROMA_CONFIG";

    /// Load configuration from disk, respecting the `CHROMA_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedClientConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedClientConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedClientConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Like [`ClientConfig::load_with_source`] but falls back to built-in
    /// defaults when no candidate exists. Parse and validation failures are
    /// still reported.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedClientConfig> {
        let env_set = std::env::var(Self::ENV_CONFIG_PATH)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if env_set || candidates.iter().any(|c| c.as_ref().exists()) {
            return Self::load_with_source(candidates);
        }
        debug!("no configuration file present; using defaults");
        Ok(LoadedClientConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ClientConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the pair that owns `key`, returning the pair name as well.
    pub fn pair_for(&self, key: &str) -> Option<(&str, &ParameterPairConfig)> {
        self.parameters
            .iter()
            .find(|(_, pair)| pair.min_key == key || pair.max_key == key)
            .map(|(name, pair)| (name.as_str(), pair))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.streams.validate()?;
        self.console.validate()?;
        if self.parameters.is_empty() {
            return Err(anyhow!("configuration must declare at least one parameter pair"));
        }
        let mut seen = HashSet::new();
        for (name, pair) in &self.parameters {
            pair.validate(name)?;
            for key in [&pair.min_key, &pair.max_key] {
                if !seen.insert(key.as_str()) {
                    return Err(anyhow!("parameter key '{}' declared more than once", key));
                }
            }
        }
        self.scripts.validate()?;
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            streams: StreamsConfig::default(),
            console: ConsoleConfig::default(),
            parameters: default_parameter_pairs(),
            scripts: ScriptsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for ClientConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: ClientConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the bot backend and HTTP client tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Parse the configured base URL.
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .with_context(|| format!("invalid backend base url '{}'", self.base_url))
    }

    fn validate(&self) -> Result<()> {
        let url = self.url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend base url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("backend request timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Settings shared by every telemetry stream.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_reconnect_delay", rename = "reconnect_delay_ms")]
    pub reconnect_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Capacity of the in-process log fan-out.
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

impl StreamsConfig {
    fn validate(&self) -> Result<()> {
        if self.reconnect_delay.is_zero() {
            return Err(anyhow!("stream reconnect delay must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("stream connect timeout must be greater than zero"));
        }
        if self.log_buffer == 0 {
            return Err(anyhow!("stream log buffer must hold at least one line"));
        }
        for topic in &self.topics {
            if !KNOWN_TOPICS.contains(&topic.as_str()) {
                return Err(anyhow!(
                    "unknown stream topic '{}'; expected one of {}",
                    topic,
                    KNOWN_TOPICS.join(", ")
                ));
            }
        }
        Ok(())
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: default_reconnect_delay(),
            connect_timeout: default_connect_timeout(),
            log_buffer: default_log_buffer(),
            topics: default_topics(),
        }
    }
}

/// Geometry of the log console used for the auto-scroll decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_scroll_threshold")]
    pub scroll_threshold_px: u32,
    #[serde(default = "default_line_height")]
    pub line_height_px: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height_px: u32,
    /// Oldest lines are evicted past this count.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl ConsoleConfig {
    fn validate(&self) -> Result<()> {
        if self.line_height_px == 0 {
            return Err(anyhow!("console line height must be greater than zero"));
        }
        if self.max_lines == 0 {
            return Err(anyhow!("console must retain at least one line"));
        }
        Ok(())
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            scroll_threshold_px: default_scroll_threshold(),
            line_height_px: default_line_height(),
            viewport_height_px: default_viewport_height(),
            max_lines: default_max_lines(),
        }
    }
}

/// A min/max pair of tuning parameters sharing one upper limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterPairConfig {
    pub min_key: String,
    pub max_key: String,
    pub limit: i64,
}

impl ParameterPairConfig {
    pub fn new(min_key: impl Into<String>, max_key: impl Into<String>, limit: i64) -> Self {
        Self {
            min_key: min_key.into(),
            max_key: max_key.into(),
            limit,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.limit < 1 {
            return Err(anyhow!(
                "parameter pair '{}' needs a limit of at least 1 to keep min below max",
                name
            ));
        }
        if self.min_key.trim().is_empty() || self.max_key.trim().is_empty() {
            return Err(anyhow!("parameter pair '{}' has an empty key", name));
        }
        if self.min_key == self.max_key {
            return Err(anyhow!(
                "parameter pair '{}' uses '{}' for both bounds",
                name,
                self.min_key
            ));
        }
        Ok(())
    }
}

/// Script catalogue filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Identifiers never offered for selection.
    #[serde(default = "default_hidden_scripts")]
    pub hidden: Vec<String>,
    /// Exclusive inspection target started through its own shortcut.
    #[serde(default = "default_inspection_target")]
    pub inspection_target: String,
}

impl ScriptsConfig {
    fn validate(&self) -> Result<()> {
        if self.inspection_target.trim().is_empty() {
            return Err(anyhow!("scripts.inspection_target must not be empty"));
        }
        Ok(())
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            hidden: default_hidden_scripts(),
            inspection_target: default_inspection_target(),
        }
    }
}

/// Logging configuration for the client binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
