//! Audio service: the entry point for question audio.
//!
//! Callers describe *what* to play (pitches, an instrument, a
//! presentation) and get back a reference the web layer can serve. The
//! service turns that into a [`RenderRequest`], looks it up in the cache,
//! renders on a miss, and maps the file to a URL.

use super::bank::{SampleBank, SampleBankResolver};
use super::cache::{AudioCache, CacheStats};
use super::renderer::NoteRenderer;
use super::request::{NoteEvent, OutputFormat, RenderRequest, DEFAULT_SAMPLE_RATE, DEFAULT_VELOCITY};
use super::synth::EngineKind;
use crate::config::AudioConfig;
use crate::error::{AudioError, AudioResult};
use crate::music::{Direction, Interval, Pitch};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the notes of a question are laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Presentation {
    /// One after another: note `i` starts at `i * (note_duration + gap)`.
    Melodic { note_duration: Duration, gap: Duration },
    /// All notes struck together.
    Harmonic { duration: Duration },
    /// The root sounds first; note `i` enters at `i * delay` and the
    /// notes overlap.
    Staggered {
        root_duration: Duration,
        second_duration: Duration,
        delay: Duration,
    },
}

impl Presentation {
    /// One second per note with a half-second gap.
    pub fn melodic() -> Self {
        Presentation::Melodic {
            note_duration: Duration::from_millis(1000),
            gap: Duration::from_millis(500),
        }
    }

    /// Both notes together for 1.5 seconds.
    pub fn harmonic() -> Self {
        Presentation::Harmonic {
            duration: Duration::from_millis(1500),
        }
    }

    /// Root first, second note 400 ms later, each held 1.5 seconds.
    pub fn staggered() -> Self {
        Presentation::Staggered {
            root_duration: Duration::from_millis(1500),
            second_duration: Duration::from_millis(1500),
            delay: Duration::from_millis(400),
        }
    }

    /// Parses "melodic", "harmonic" or "staggered" into the default timing.
    pub fn from_mode(mode: &str) -> Result<Self, AudioError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "melodic" => Ok(Self::melodic()),
            "harmonic" => Ok(Self::harmonic()),
            "staggered" => Ok(Self::staggered()),
            other => Err(AudioError::InvalidRenderRequest(format!(
                "unknown presentation '{}'",
                other
            ))),
        }
    }

    /// Lays out `notes` in time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRenderRequest` if an onset does not fit in a
    /// `Duration`.
    pub fn events(&self, notes: &[Pitch], velocity: u8) -> AudioResult<Vec<NoteEvent>> {
        notes
            .iter()
            .enumerate()
            .map(|(i, &pitch)| {
                let (onset, duration) = match *self {
                    Presentation::Melodic { note_duration, gap } => {
                        let step = note_duration.checked_add(gap).ok_or_else(timing_overflow)?;
                        (offset(step, i)?, note_duration)
                    }
                    Presentation::Harmonic { duration } => (Duration::ZERO, duration),
                    Presentation::Staggered {
                        root_duration,
                        second_duration,
                        delay,
                    } => {
                        if i == 0 {
                            (Duration::ZERO, root_duration)
                        } else {
                            (offset(delay, i)?, second_duration)
                        }
                    }
                };
                Ok(NoteEvent::new(pitch, onset, duration).with_velocity(velocity))
            })
            .collect()
    }
}

fn timing_overflow() -> AudioError {
    AudioError::InvalidRenderRequest("note timing overflows".to_string())
}

/// Onset of the `index`-th step of length `step`.
fn offset(step: Duration, index: usize) -> AudioResult<Duration> {
    u32::try_from(index)
        .ok()
        .and_then(|index| step.checked_mul(index))
        .ok_or_else(timing_overflow)
}

/// An instrument by name and General MIDI program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    pub program: u8,
}

/// Named General MIDI programs accepted by [`Instrument::from_name`].
const GM_INSTRUMENTS: &[(&str, u8)] = &[
    ("piano", 0),
    ("bright_piano", 1),
    ("electric_piano", 4),
    ("harpsichord", 6),
    ("celesta", 8),
    ("vibraphone", 11),
    ("marimba", 12),
    ("organ", 19),
    ("accordion", 21),
    ("guitar", 24),
    ("electric_guitar", 27),
    ("bass", 32),
    ("violin", 40),
    ("viola", 41),
    ("cello", 42),
    ("strings", 48),
    ("choir", 52),
    ("trumpet", 56),
    ("trombone", 57),
    ("horn", 60),
    ("saxophone", 65),
    ("oboe", 68),
    ("clarinet", 71),
    ("flute", 73),
];

impl Instrument {
    /// Acoustic grand piano (program 0).
    pub fn piano() -> Self {
        Self {
            name: "piano".to_string(),
            program: 0,
        }
    }

    /// Creates an instrument for a raw program number.
    pub fn program(program: u8) -> Result<Self, AudioError> {
        if program > 127 {
            return Err(AudioError::InvalidRenderRequest(format!(
                "program {} out of range",
                program
            )));
        }
        Ok(Self {
            name: format!("program:{}", program),
            program,
        })
    }

    /// Looks up a named instrument, or parses "program:<n>".
    pub fn from_name(name: &str) -> Result<Self, AudioError> {
        let wanted = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        if let Some(number) = wanted.strip_prefix("program:") {
            let program = number.parse().map_err(|_| {
                AudioError::InvalidRenderRequest(format!("invalid program '{}'", number))
            })?;
            return Self::program(program);
        }
        GM_INSTRUMENTS
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|&(n, program)| Self {
                name: n.to_string(),
                program,
            })
            .ok_or_else(|| AudioError::InvalidRenderRequest(format!("unknown instrument '{}'", name)))
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::piano()
    }
}

/// Rendering knobs that are not part of the musical question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub velocity: u8,
    /// None uses the service default.
    pub sample_rate: Option<u32>,
    pub format: OutputFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            velocity: DEFAULT_VELOCITY,
            sample_rate: None,
            format: OutputFormat::default(),
        }
    }
}

/// One question's audio, for batch generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioQuestion {
    pub notes: Vec<Pitch>,
    pub instrument: Instrument,
    pub presentation: Presentation,
    #[serde(default)]
    pub options: RenderOptions,
}

/// A playable file as seen by the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioRef {
    /// URL under the media prefix.
    pub url: String,
    /// Location on disk, for serving the bytes.
    pub path: PathBuf,
    /// MIME type of the file.
    pub content_type: &'static str,
}

/// Renders and caches question audio.
pub struct AudioService {
    bank: SampleBank,
    renderer: Arc<NoteRenderer>,
    /// None when caching is disabled.
    cache: Option<AudioCache>,
    media_root: PathBuf,
    media_url: String,
    generated_dir: PathBuf,
    sample_rate: u32,
}

impl AudioService {
    /// Builds the service from configuration.
    ///
    /// # Errors
    ///
    /// - `MissingSampleBank` if the SoundFont engine is selected and the
    ///   bank is not configured, missing, or invalid
    /// - `CacheWrite`/`Io` if the cache directory cannot be prepared
    pub fn from_config(config: &AudioConfig) -> AudioResult<Self> {
        let bank = match config.engine {
            EngineKind::SoundFont => {
                let path = config.soundfont_path.as_ref().ok_or_else(|| {
                    AudioError::MissingSampleBank {
                        path: PathBuf::new(),
                        reason: "SOUNDFONT_PATH is not set".to_string(),
                    }
                })?;
                SampleBankResolver::new(config.base_dir.clone()).resolve(path)?
            }
            EngineKind::Tone => SampleBank::builtin_tone(),
        };

        let renderer = Arc::new(NoteRenderer::new(config.render_timeout()));
        renderer.register_bank(bank.clone());

        let cache = if config.cache_enabled {
            Some(AudioCache::open(config.cache_dir(), config.cache_limits())?)
        } else {
            None
        };

        let sample_rate = if config.sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            config.sample_rate
        };

        info!(
            engine = ?config.engine,
            bank = bank.id(),
            cache = config.cache_enabled,
            "Audio service ready"
        );

        Ok(Self {
            bank,
            renderer,
            cache,
            media_root: config.media_root.clone(),
            media_url: config.media_url.clone(),
            generated_dir: config.generated_dir(),
            sample_rate,
        })
    }

    /// Renders (or reuses) the audio for a question.
    ///
    /// # Errors
    ///
    /// Any [`AudioError`]; invalid questions are rejected before anything
    /// is rendered or written.
    pub fn generate_audio_for(
        &self,
        notes: &[Pitch],
        instrument: &Instrument,
        presentation: &Presentation,
        options: &RenderOptions,
    ) -> AudioResult<AudioRef> {
        let request = self.build_request(presentation.events(notes, options.velocity)?, instrument, options);
        self.generate(&request)
    }

    /// Renders an interval built on `root`.
    pub fn generate_interval(
        &self,
        root: Pitch,
        interval: Interval,
        direction: Direction,
        instrument: &Instrument,
        presentation: &Presentation,
        options: &RenderOptions,
    ) -> AudioResult<AudioRef> {
        let second = interval.from_root(root, direction)?;
        self.generate_audio_for(&[root, second], instrument, presentation, options)
    }

    /// Renders a chord progression, each chord held for `chord_duration`.
    pub fn generate_progression(
        &self,
        chords: &[Vec<Pitch>],
        chord_duration: Duration,
        instrument: &Instrument,
        options: &RenderOptions,
    ) -> AudioResult<AudioRef> {
        let mut events = Vec::new();
        for (i, chord) in chords.iter().enumerate() {
            let onset = offset(chord_duration, i)?;
            events.extend(
                chord
                    .iter()
                    .map(|&pitch| NoteEvent::new(pitch, onset, chord_duration).with_velocity(options.velocity)),
            );
        }
        let request = self.build_request(events, instrument, options);
        self.generate(&request)
    }

    /// Renders a batch of questions in parallel.
    ///
    /// Results come back in input order.
    pub fn prewarm(&self, questions: &[AudioQuestion]) -> Vec<AudioResult<AudioRef>> {
        debug!(count = questions.len(), "Prewarming audio");
        questions
            .par_iter()
            .map(|q| self.generate_audio_for(&q.notes, &q.instrument, &q.presentation, &q.options))
            .collect()
    }

    /// Bank used for every render.
    pub fn bank(&self) -> &SampleBank {
        &self.bank
    }

    /// Preset names of the SoundFont, or None for the tone engine.
    pub fn instrument_names(&self) -> AudioResult<Option<[String; 128]>> {
        self.renderer.instrument_names(self.bank.id())
    }

    /// Number of engine invocations since start.
    pub fn render_count(&self) -> u64 {
        self.renderer.render_count()
    }

    /// Cache counters, or None when caching is disabled.
    pub fn stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(AudioCache::stats)
    }

    /// Deletes all cached audio. Returns the number of files removed.
    pub fn clear_cache(&self) -> usize {
        self.cache.as_ref().map(AudioCache::clear).unwrap_or(0)
    }

    /// Persists the cache index and releases synthesis sessions.
    pub fn shutdown(&self) -> AudioResult<()> {
        self.renderer.shutdown();
        match &self.cache {
            Some(cache) => cache.persist_index(),
            None => Ok(()),
        }
    }

    fn build_request(&self, events: Vec<NoteEvent>, instrument: &Instrument, options: &RenderOptions) -> RenderRequest {
        RenderRequest::new(events, self.bank.id())
            .with_program(instrument.program)
            .with_sample_rate(options.sample_rate.unwrap_or(self.sample_rate))
            .with_format(options.format)
    }

    fn generate(&self, request: &RenderRequest) -> AudioResult<AudioRef> {
        // Reject bad requests before touching the cache or the disk.
        request.validate()?;
        let path = match &self.cache {
            Some(cache) => cache.get_or_render(request, |r| self.renderer.render(r))?.path,
            None => {
                let bytes = self.renderer.render(request)?;
                self.write_uncached(&bytes, request.format)?
            }
        };
        Ok(AudioRef {
            url: self.url_for(&path),
            content_type: request.format.content_type(),
            path,
        })
    }

    /// Writes a one-off render under a fresh name.
    fn write_uncached(&self, bytes: &[u8], format: OutputFormat) -> AudioResult<PathBuf> {
        let name = uuid::Uuid::new_v4().simple().to_string();
        let final_path = self.generated_dir.join(format!("{}.{}", name, format.extension()));
        let temp_path = self.generated_dir.join(format!(".{}.tmp", name));

        let written = (|| -> std::io::Result<()> {
            fs::create_dir_all(&self.generated_dir)?;
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();

        written.map(|()| final_path.clone()).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            AudioError::cache_write(final_path, e)
        })
    }

    /// Maps a file under the media root to its public URL.
    fn url_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.media_root) {
            Ok(relative) => {
                let relative: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                let prefix = self.media_url.trim_end_matches('/');
                format!("{}/{}", prefix, relative.join("/"))
            }
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Audio service shutdown incomplete");
        }
    }
}
