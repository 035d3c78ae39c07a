//! Synthesis sessions.
//!
//! [`Synth`] is the seam between the renderer's event scheduling and the
//! engine that actually produces samples. The SoundFont session wraps
//! rustysynth; the tone session is a small deterministic additive voice
//! for setups without a SoundFont.

use crate::error::AudioError;
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Program change is MIDI command 0xC0 (192).
const PROGRAM_CHANGE: i32 = 0xC0;

/// Engine selected for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// SoundFont rendering through rustysynth.
    #[default]
    #[serde(rename = "soundfont", alias = "sf2", alias = "fluidsynth")]
    SoundFont,
    /// Built-in additive tone voice.
    #[serde(alias = "synthetic")]
    Tone,
}

impl std::str::FromStr for EngineKind {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soundfont" | "sf2" | "fluidsynth" => Ok(EngineKind::SoundFont),
            "tone" | "synthetic" => Ok(EngineKind::Tone),
            other => Err(AudioError::Config(format!("unknown audio engine '{}'", other))),
        }
    }
}

/// A stateful synthesis session.
///
/// Sessions are not reentrant; callers serialize access through a lock.
pub trait Synth: Send {
    /// Silences all voices and restores controllers to their defaults.
    fn reset(&mut self);

    /// Selects an instrument for a channel.
    fn program_change(&mut self, channel: u8, program: u8);

    /// Starts a note.
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8);

    /// Releases a note.
    fn note_off(&mut self, channel: u8, key: u8);

    /// Renders the next `left.len()` frames. Both buffers have equal length.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);
}

/// Loads a SoundFont file.
///
/// # Errors
///
/// Returns `SynthesisEngine` if the file cannot be opened or parsed.
pub fn load_soundfont(path: &Path) -> Result<Arc<SoundFont>, AudioError> {
    let mut file = BufReader::new(File::open(path).map_err(|e| {
        AudioError::SynthesisEngine(format!(
            "failed to open SoundFont {}: {}",
            path.display(),
            e
        ))
    })?);
    let soundfont = SoundFont::new(&mut file).map_err(|e| {
        AudioError::SynthesisEngine(format!("failed to load SoundFont: {:?}", e))
    })?;
    Ok(Arc::new(soundfont))
}

/// Extracts instrument names from the SoundFont's presets.
///
/// Maps program numbers (0-127) to preset names from bank 0 (General MIDI bank).
/// If a program number has no preset in the SoundFont, falls back to "Program N".
pub fn instrument_names(soundfont: &SoundFont) -> [String; 128] {
    let mut names: [String; 128] = std::array::from_fn(|i| format!("Program {}", i));

    for preset in soundfont.get_presets() {
        let bank = preset.get_bank_number();
        let program = preset.get_patch_number();

        if bank == 0 && (0..128).contains(&program) {
            names[program as usize] = preset.get_name().to_string();
        }
    }

    names
}

/// A rustysynth synthesizer bound to one SoundFont and sample rate.
pub struct SoundFontSynth {
    synth: Synthesizer,
}

impl SoundFontSynth {
    /// Creates a synthesizer session.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisEngine` if rustysynth rejects the settings.
    pub fn new(soundfont: &Arc<SoundFont>, sample_rate: u32) -> Result<Self, AudioError> {
        let settings = SynthesizerSettings::new(sample_rate as i32);
        let synth = Synthesizer::new(soundfont, &settings).map_err(|e| {
            AudioError::SynthesisEngine(format!("failed to create synthesizer: {:?}", e))
        })?;
        Ok(Self { synth })
    }
}

impl Synth for SoundFontSynth {
    fn reset(&mut self) {
        self.synth.reset();
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.synth
            .process_midi_message(channel as i32, PROGRAM_CHANGE, program as i32, 0);
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.synth
            .note_on(channel as i32, key as i32, velocity as i32);
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        self.synth.note_off(channel as i32, key as i32);
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synth.render(left, right);
    }
}

/// Release time constant after note-off, in seconds.
const TONE_RELEASE_SECONDS: f64 = 0.08;

/// Output gain for a full-velocity voice; keeps a few voices below clipping.
const TONE_GAIN: f64 = 0.35;

/// A voice of the additive tone engine.
#[derive(Debug, Clone)]
struct ToneVoice {
    channel: u8,
    key: u8,
    frequency: f64,
    amplitude: f64,
    /// Frames rendered since note-on.
    position: u64,
    /// Frame at which note-off arrived.
    released_at: Option<u64>,
}

impl ToneVoice {
    fn sample(&self, sample_rate: f64) -> f64 {
        let t = self.position as f64 / sample_rate;
        let phase = std::f64::consts::TAU * self.frequency * t;
        // Fundamental plus two partials for a piano-like colour
        let wave = phase.sin() + 0.3 * (2.0 * phase).sin() + 0.1 * (3.0 * phase).sin();
        let envelope = (-t * 3.0).exp() * (1.0 - (-t * 20.0).exp());
        let release = match self.released_at {
            Some(at) => {
                let since = (self.position - at) as f64 / sample_rate;
                (-since / TONE_RELEASE_SECONDS).exp()
            }
            None => 1.0,
        };
        wave * envelope * release * self.amplitude / 1.4
    }

    fn is_finished(&self, sample_rate: f64) -> bool {
        match self.released_at {
            // Ten time constants is below 16-bit resolution
            Some(at) => (self.position - at) as f64 / sample_rate > TONE_RELEASE_SECONDS * 10.0,
            None => false,
        }
    }
}

/// Deterministic additive synthesizer used when no SoundFont is configured.
///
/// Ignores program changes: every instrument sounds the same.
pub struct ToneSynth {
    sample_rate: f64,
    voices: Vec<ToneVoice>,
}

impl ToneSynth {
    /// Creates a tone session at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            voices: Vec::new(),
        }
    }

    /// Number of voices still sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

impl Synth for ToneSynth {
    fn reset(&mut self) {
        self.voices.clear();
    }

    fn program_change(&mut self, _channel: u8, _program: u8) {}

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        if velocity == 0 {
            // MIDI convention: note-on with velocity 0 is a note-off
            self.note_off(channel, key);
            return;
        }
        let frequency = 440.0 * 2f64.powf((key as f64 - 69.0) / 12.0);
        self.voices.push(ToneVoice {
            channel,
            key,
            frequency,
            amplitude: TONE_GAIN * velocity.min(127) as f64 / 127.0,
            position: 0,
            released_at: None,
        });
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.channel == channel && v.key == key && v.released_at.is_none())
        {
            voice.released_at = Some(voice.position);
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mut mix = 0.0f64;
            for voice in &mut self.voices {
                mix += voice.sample(self.sample_rate);
                voice.position += 1;
            }
            *l = mix as f32;
            *r = mix as f32;
        }
        let sample_rate = self.sample_rate;
        self.voices.retain(|v| !v.is_finished(sample_rate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_frames(synth: &mut dyn Synth, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        synth.render(&mut left, &mut right);
        (left, right)
    }

    #[test]
    fn test_tone_silent_without_notes() {
        let mut synth = ToneSynth::new(44100);
        let (left, right) = render_frames(&mut synth, 512);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_tone_note_produces_bounded_signal() {
        let mut synth = ToneSynth::new(44100);
        synth.note_on(0, 69, 127);
        let (left, right) = render_frames(&mut synth, 4410);
        assert!(left.iter().any(|&s| s.abs() > 0.01));
        assert!(left.iter().all(|&s| s.abs() <= 1.0));
        assert_eq!(left, right);
    }

    #[test]
    fn test_tone_is_deterministic() {
        let mut a = ToneSynth::new(48000);
        let mut b = ToneSynth::new(48000);
        for synth in [&mut a, &mut b] {
            synth.note_on(0, 60, 100);
            synth.note_on(0, 64, 100);
        }
        assert_eq!(render_frames(&mut a, 2048), render_frames(&mut b, 2048));
    }

    #[test]
    fn test_tone_release_ends_voice() {
        let mut synth = ToneSynth::new(44100);
        synth.note_on(0, 60, 100);
        render_frames(&mut synth, 1000);
        synth.note_off(0, 60);
        assert_eq!(synth.active_voices(), 1);
        render_frames(&mut synth, 44100);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_tone_reset_clears_voices() {
        let mut synth = ToneSynth::new(44100);
        synth.note_on(0, 60, 100);
        synth.note_on(0, 0, 0); // velocity 0 is a note-off, no new voice
        assert_eq!(synth.active_voices(), 1);
        synth.reset();
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("soundfont".parse::<EngineKind>().unwrap(), EngineKind::SoundFont);
        assert_eq!("Tone".parse::<EngineKind>().unwrap(), EngineKind::Tone);
        assert!("fm".parse::<EngineKind>().is_err());
        assert_eq!(serde_json::to_string(&EngineKind::SoundFont).unwrap(), "\"soundfont\"");
        assert_eq!(serde_json::from_str::<EngineKind>("\"sf2\"").unwrap(), EngineKind::SoundFont);
        assert_eq!(serde_json::from_str::<EngineKind>("\"synthetic\"").unwrap(), EngineKind::Tone);
    }

    #[test]
    #[ignore] // Requires SoundFont file
    fn test_soundfont_session_renders() {
        let soundfont = load_soundfont(Path::new("assets/TimGM6mb.sf2")).unwrap();
        let names = instrument_names(&soundfont);
        assert!(!names[0].is_empty());
        let mut synth = SoundFontSynth::new(&soundfont, 44100).unwrap();
        synth.program_change(0, 0);
        synth.note_on(0, 60, 100);
        let (left, _) = render_frames(&mut synth, 4410);
        assert!(left.iter().any(|&s| s != 0.0));
    }
}
