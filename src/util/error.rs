//! Error types for the path tracing core.
//!
//! Nothing in the frame loop is allowed to abort rendering; these errors are
//! returned by the individual fallible steps and turned into degraded behaviour
//! (fewer lights, software tracing, unfiltered pixels) plus a log line by the
//! caller.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for path tracing operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Light pool has no free slot
    #[error("Light pool exhausted (capacity {0})")]
    LightPoolFull(usize),

    /// Interaction arena has no free slot
    #[error("Interaction arena exhausted (capacity {0})")]
    InteractionArenaFull(usize),

    /// A single surface does not fit into an empty acceleration batch
    #[error("Surface too large for batch: {vertices} vertices, {indices} indices")]
    SurfaceTooLarge { vertices: usize, indices: usize },

    /// Hardware backend capability probe failed
    #[error("Hardware backend unavailable: {0}")]
    HardwareUnavailable(String),

    /// Bottom/top level structure build or upload failed
    #[error("Acceleration structure build failed: {0}")]
    AccelBuildFailed(String),

    /// Hardware ray query or frame dispatch failed
    #[error("Hardware trace failed: {0}")]
    TraceFailed(String),

    /// Entity description text could not be tokenized
    #[error("Malformed entity string at line {line}: {message}")]
    EntityParse { line: usize, message: String },

    /// Entity value could not be converted (e.g. origin with two components)
    #[error("Invalid value for key '{key}': {value}")]
    InvalidEntityValue { key: String, value: String },

    /// Unrecognized option name or value
    #[error("Invalid setting {key} = {value}")]
    InvalidSetting { key: String, value: String },

    /// Settings file does not exist
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    /// Settings (de)serialization error
    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid setting error.
    pub fn setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an entity parse error.
    pub fn entity(line: usize, message: impl Into<String>) -> Self {
        Self::EntityParse {
            line,
            message: message.into(),
        }
    }

    /// Resource exhaustion errors are recovered by dropping work.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::LightPoolFull(_) | Self::InteractionArenaFull(_) | Self::SurfaceTooLarge { .. }
        )
    }
}

/// Result type alias for path tracing operations.
pub type Result<T> = std::result::Result<T, Error>;
