//! ---
//! chroma_section: "02-messaging-ipc-data-model"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Wire types and payload codecs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Local checks that run to completion before anything touches the network.

use crate::types::{ColourSubmission, RunConfig};

/// Operator input rejected before any request is issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Colour name was empty after trimming.
    #[error("Please enter a name.")]
    EmptyName,
    /// Colour name contains whitespace.
    #[error("Name cannot contain spaces.")]
    NameContainsWhitespace,
    /// RGB triple did not have exactly three channels.
    #[error("rgb must have exactly three channels, got {0}")]
    RgbArity(usize),
    /// RGB channel outside `[0, 255]`.
    #[error("rgb channel {channel} out of range: {value}")]
    RgbOutOfRange {
        /// Zero-based channel index.
        channel: usize,
        /// Offending value.
        value: i64,
    },
    /// Start requested without a selection.
    #[error("Please select a script.")]
    NoScriptSelected,
    /// Selection is not part of the current catalogue.
    #[error("script '{0}' is not available")]
    UnknownScript(String),
    /// Parameter key is not declared in any pair.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
}

/// Trim and check a colour name.
pub fn validate_colour_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ValidationError::NameContainsWhitespace);
    }
    Ok(name.to_owned())
}

/// Check that `channels` is a valid RGB triple.
pub fn validate_rgb(channels: &[i64]) -> Result<[u8; 3], ValidationError> {
    if channels.len() != 3 {
        return Err(ValidationError::RgbArity(channels.len()));
    }
    let mut rgb = [0u8; 3];
    for (channel, value) in channels.iter().enumerate() {
        rgb[channel] = u8::try_from(*value).map_err(|_| ValidationError::RgbOutOfRange {
            channel,
            value: *value,
        })?;
    }
    Ok(rgb)
}

impl ColourSubmission {
    /// Validate operator input and build the submission body.
    pub fn new(name: &str, rgb: Option<&[i64]>) -> Result<Self, ValidationError> {
        let name = validate_colour_name(name)?;
        let rgb = rgb.map(validate_rgb).transpose()?;
        Ok(Self { name, rgb })
    }
}

impl RunConfig {
    /// Build a run request from the current selection.
    pub fn from_selection(selection: Option<&str>) -> Result<Self, ValidationError> {
        match selection.map(str::trim) {
            Some(script) if !script.is_empty() => Ok(RunConfig::new(script)),
            _ => Err(ValidationError::NoScriptSelected),
        }
    }
}
