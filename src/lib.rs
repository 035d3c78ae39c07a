//! earsynth - Rendered and cached audio for ear-training exercises.
//!
//! This library turns musical questions (intervals, chords, melodies)
//! into WAV files using a SoundFont synthesizer, and caches each result
//! under a key derived from everything that affects the output.

pub mod audio;
pub mod config;
pub mod error;
pub mod music;

// Re-export commonly used types
pub use audio::{AudioRef, AudioService, Instrument, Presentation, RenderOptions};
pub use config::AudioConfig;
pub use error::{AudioError, AudioResult};
pub use music::{Direction, Interval, Pitch};
