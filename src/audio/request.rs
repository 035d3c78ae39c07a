//! Render requests and their cache fingerprints.
//!
//! A [`RenderRequest`] is the complete description of one audio excerpt:
//! which notes sound when, through which bank and program, at what
//! sample rate and container format. Everything that can change the
//! rendered bytes is part of the [`CacheKey`].

use crate::error::AudioError;
use crate::music::Pitch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Silence appended after the last note-off so release tails are not clipped.
pub const RELEASE_TAIL: Duration = Duration::from_secs(1);

/// Default note velocity (0-127).
pub const DEFAULT_VELOCITY: u8 = 100;

/// Default output sample rate (44.1 kHz standard).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Accepted sample-rate range in Hz.
pub const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 8_000..=192_000;

/// Longest excerpt accepted, release tail included.
pub const MAX_RENDER_LENGTH: Duration = Duration::from_secs(60);

/// Bumped whenever the render pipeline changes its output for the same input.
const RENDER_FORMAT_VERSION: u32 = 2;

/// A single note with timing and dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// The pitch to play.
    pub pitch: Pitch,
    /// Offset from the start of the excerpt.
    pub onset: Duration,
    /// How long the key is held.
    pub duration: Duration,
    /// Note velocity (0-127). 0 is silent, 127 is maximum.
    pub velocity: u8,
}

impl NoteEvent {
    /// Creates a note at `onset` lasting `duration` with the default velocity.
    pub fn new(pitch: Pitch, onset: Duration, duration: Duration) -> Self {
        Self {
            pitch,
            onset,
            duration,
            velocity: DEFAULT_VELOCITY,
        }
    }

    /// Creates a note from a raw MIDI number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPitch` if `midi` is above 127.
    pub fn from_midi(midi: u8, onset: Duration, duration: Duration) -> Result<Self, AudioError> {
        Ok(Self::new(Pitch::from_midi(midi)?, onset, duration))
    }

    /// Sets the velocity.
    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    /// Returns the note-off time (onset + duration).
    pub fn end(&self) -> Duration {
        self.onset.saturating_add(self.duration)
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 16-bit PCM WAV, two channels.
    #[default]
    WavStereo16,
    /// 16-bit PCM WAV, one channel (average of left and right).
    WavMono16,
}

impl OutputFormat {
    /// Number of channels written.
    pub fn channels(self) -> u16 {
        match self {
            OutputFormat::WavStereo16 => 2,
            OutputFormat::WavMono16 => 1,
        }
    }

    /// File extension for the container.
    pub fn extension(self) -> &'static str {
        "wav"
    }

    /// MIME type served for the container.
    pub fn content_type(self) -> &'static str {
        "audio/wav"
    }

    fn tag(self) -> &'static str {
        match self {
            OutputFormat::WavStereo16 => "wav_s16_stereo",
            OutputFormat::WavMono16 => "wav_s16_mono",
        }
    }
}

/// A complete, self-describing request for one rendered excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Notes to play, in any order.
    pub events: Vec<NoteEvent>,
    /// General MIDI program number (0-127).
    pub program: u8,
    /// Identifier of the sample bank to render with.
    pub bank_id: String,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output container format.
    pub format: OutputFormat,
}

impl RenderRequest {
    /// Creates a request with program 0, the default sample rate and
    /// stereo WAV output.
    pub fn new(events: Vec<NoteEvent>, bank_id: impl Into<String>) -> Self {
        Self {
            events,
            program: 0,
            bank_id: bank_id.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            format: OutputFormat::default(),
        }
    }

    /// Sets the program number.
    pub fn with_program(mut self, program: u8) -> Self {
        self.program = program;
        self
    }

    /// Sets the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Checks the structural invariants of the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRenderRequest` if the sequence is empty, no note
    /// starts at zero, a note has zero length, a velocity or program is
    /// above 127, the sample rate is out of range, or the excerpt is longer
    /// than [`MAX_RENDER_LENGTH`].
    pub fn validate(&self) -> Result<(), AudioError> {
        let invalid = |msg: String| Err(AudioError::InvalidRenderRequest(msg));

        if self.events.is_empty() {
            return invalid("note sequence is empty".into());
        }
        if !self.events.iter().any(|e| e.onset.is_zero()) {
            return invalid("no note starts at offset zero".into());
        }
        if let Some(e) = self.events.iter().find(|e| e.duration.is_zero()) {
            return invalid(format!("note {} has zero duration", e.pitch));
        }
        if let Some(e) = self.events.iter().find(|e| e.velocity > 127) {
            return invalid(format!("velocity {} out of range for {}", e.velocity, e.pitch));
        }
        if self.program > 127 {
            return invalid(format!("program {} out of range", self.program));
        }
        if !SAMPLE_RATE_RANGE.contains(&self.sample_rate) {
            return invalid(format!("sample rate {} Hz out of range", self.sample_rate));
        }
        if self.bank_id.is_empty() {
            return invalid("no sample bank given".into());
        }
        if let Some(e) = self
            .events
            .iter()
            .find(|e| e.onset > MAX_RENDER_LENGTH || e.duration > MAX_RENDER_LENGTH)
        {
            return invalid(format!("note {} is longer than {:?}", e.pitch, MAX_RENDER_LENGTH));
        }
        if self.total_length() > MAX_RENDER_LENGTH {
            return invalid(format!(
                "excerpt of {:?} exceeds {:?}",
                self.total_length(),
                MAX_RENDER_LENGTH
            ));
        }
        Ok(())
    }

    /// Time from the start to the last note-off.
    pub fn content_length(&self) -> Duration {
        self.events
            .iter()
            .map(NoteEvent::end)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Full rendered length: content plus [`RELEASE_TAIL`].
    pub fn total_length(&self) -> Duration {
        self.content_length().saturating_add(RELEASE_TAIL)
    }

    /// Number of frames the renderer produces for this request.
    pub fn total_frames(&self) -> usize {
        duration_to_frames(self.total_length(), self.sample_rate)
    }

    /// Computes the content fingerprint.
    pub fn cache_key(&self) -> CacheKey {
        let mut events: Vec<CanonicalEvent> = self
            .events
            .iter()
            .map(|e| CanonicalEvent {
                onset_ns: e.onset.as_nanos(),
                pitch: e.pitch.midi(),
                duration_ns: e.duration.as_nanos(),
                velocity: e.velocity,
            })
            .collect();
        events.sort();

        let canonical = CanonicalRequest {
            version: RENDER_FORMAT_VERSION,
            events,
            program: self.program,
            bank: &self.bank_id,
            sample_rate: self.sample_rate,
            format: self.format.tag(),
            release_tail_ns: RELEASE_TAIL.as_nanos(),
        };

        // Struct fields serialize in declaration order, so this is stable.
        let json = serde_json::to_vec(&canonical).unwrap_or_default();
        CacheKey(blake3::hash(&json).to_hex().to_string())
    }
}

/// Converts a duration to a frame count at `sample_rate`, rounding to the
/// nearest frame.
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> usize {
    let frames = (duration.as_nanos() * sample_rate as u128 + 500_000_000) / 1_000_000_000;
    frames as usize
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct CanonicalEvent {
    onset_ns: u128,
    pitch: u8,
    duration_ns: u128,
    velocity: u8,
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    version: u32,
    events: Vec<CanonicalEvent>,
    program: u8,
    bank: &'a str,
    sample_rate: u32,
    format: &'static str,
    release_tail_ns: u128,
}

/// Deterministic fingerprint of a [`RenderRequest`]: 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parses a key from its hex form (e.g. a cache file stem).
    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    /// Returns the hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
