//! Error types for audio generation.
//!
//! Every failure in the render pipeline surfaces as an [`AudioError`].
//! Nothing is retried internally; the caller decides how to present a
//! failed generation.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the library.
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors that can occur while resolving, rendering, or caching audio.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The configured SoundFont is missing, unreadable, or not a SoundFont.
    /// Fatal at startup: nothing can be rendered without a bank.
    #[error("sample bank unavailable at {}: {reason}", path.display())]
    MissingSampleBank { path: PathBuf, reason: String },

    /// A pitch name or MIDI number outside the representable range.
    #[error("invalid pitch '{0}'")]
    InvalidPitch(String),

    /// A structurally invalid render request.
    #[error("invalid render request: {0}")]
    InvalidRenderRequest(String),

    /// The synthesis engine failed to load a bank or produce audio.
    #[error("synthesis engine error: {0}")]
    SynthesisEngine(String),

    /// A render ran longer than the configured ceiling.
    #[error("synthesis exceeded time limit of {limit:?} (ran {elapsed:?})")]
    SynthesisTimeout { limit: Duration, elapsed: Duration },

    /// Persisting a rendered artifact failed.
    #[error("failed to write cached audio to {}: {source}", path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Other I/O failure (cache directory scan, index load).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Returns true when the error was caused by the request itself rather
    /// than by the engine, the disk, or the configuration.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AudioError::InvalidPitch(_) | AudioError::InvalidRenderRequest(_)
        )
    }

    pub(crate) fn cache_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AudioError::CacheWrite {
            path: path.into(),
            source,
        }
    }
}
