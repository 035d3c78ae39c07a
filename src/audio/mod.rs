//! Audio generation for ear-training questions.
//!
//! Requests flow top to bottom through these layers:
//! - `service`: turns pitches and a presentation into a served file
//! - `cache`: content-addressed storage of rendered files
//! - `renderer`: schedules notes and drives a synthesis session
//! - `synth`: SoundFont and built-in tone engines
//! - `bank`: SoundFont discovery and validation
//! - `wav`: PCM buffers and WAV encoding

pub mod bank;
pub mod cache;
pub mod renderer;
pub mod request;
pub mod service;
pub mod synth;
pub mod wav;

pub use bank::{SampleBank, SampleBankResolver};
pub use cache::{AudioCache, CacheLimits, CacheStats};
pub use renderer::NoteRenderer;
pub use request::{CacheKey, NoteEvent, OutputFormat, RenderRequest};
pub use service::{AudioQuestion, AudioRef, AudioService, Instrument, Presentation, RenderOptions};
pub use synth::EngineKind;
