//! Note rendering.
//!
//! Turns a [`RenderRequest`] into WAV bytes by scheduling note-on and
//! note-off events against a synthesis session. Sessions are created on
//! first use, one per (bank, sample rate), and kept for the life of the
//! renderer so the SoundFont is parsed once.

use super::bank::{BankKind, SampleBank};
use super::request::{duration_to_frames, RenderRequest};
use super::synth::{instrument_names, load_soundfont, SoundFontSynth, Synth, ToneSynth};
use super::wav::PcmBuffer;
use crate::error::AudioError;
use parking_lot::{Mutex, RwLock};
use rustysynth::SoundFont;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Buffer size for rendering chunks.
/// Chunks also end early at the next scheduled event.
const RENDER_BUFFER_SIZE: usize = 4096;

/// All excerpt notes go to the first MIDI channel.
const CHANNEL: u8 = 0;

type SessionKey = (String, u32);
type SharedSession = Arc<Mutex<Box<dyn Synth>>>;

/// A scheduled note boundary, in frames from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledEvent {
    frame: usize,
    /// false sorts first: a note-off and note-on at the same frame
    /// release the old note before striking the new one.
    is_note_on: bool,
    key: u8,
    velocity: u8,
}

/// Schedules note-on at onset and note-off at onset + duration.
fn schedule(request: &RenderRequest) -> Vec<ScheduledEvent> {
    let mut events: Vec<ScheduledEvent> = Vec::with_capacity(request.events.len() * 2);
    for note in &request.events {
        events.push(ScheduledEvent {
            frame: duration_to_frames(note.onset, request.sample_rate),
            is_note_on: true,
            key: note.pitch.midi(),
            velocity: note.velocity,
        });
        events.push(ScheduledEvent {
            frame: duration_to_frames(note.end(), request.sample_rate),
            is_note_on: false,
            key: note.pitch.midi(),
            velocity: 0,
        });
    }
    events.sort();
    events
}

/// Renders requests through shared synthesis sessions.
pub struct NoteRenderer {
    /// Registered banks by id.
    banks: RwLock<HashMap<String, SampleBank>>,
    /// Parsed SoundFonts by bank id, loaded on first use.
    soundfonts: Mutex<HashMap<String, Arc<SoundFont>>>,
    /// One session per (bank id, sample rate).
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
    /// Ceiling on a single render; None disables the check.
    render_timeout: Option<Duration>,
    /// Number of engine invocations.
    render_count: AtomicU64,
}

impl NoteRenderer {
    /// Creates a renderer with no registered banks.
    pub fn new(render_timeout: Option<Duration>) -> Self {
        Self {
            banks: RwLock::new(HashMap::new()),
            soundfonts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            render_timeout,
            render_count: AtomicU64::new(0),
        }
    }

    /// Makes a bank available to requests naming its id.
    pub fn register_bank(&self, bank: SampleBank) {
        debug!(id = bank.id(), kind = ?bank.kind(), "Registered sample bank");
        self.banks.write().insert(bank.id().to_string(), bank);
    }

    /// Number of engine invocations so far.
    pub fn render_count(&self) -> u64 {
        self.render_count.load(Ordering::Relaxed)
    }

    /// Renders a request to WAV bytes.
    ///
    /// Output is byte-identical for identical requests: the session is
    /// reset before every render and nothing random enters synthesis.
    ///
    /// # Errors
    ///
    /// - `InvalidRenderRequest` if the request fails validation (the
    ///   engine is not touched)
    /// - `SynthesisEngine` if the bank is unknown or cannot be loaded
    /// - `SynthesisTimeout` if rendering exceeds the configured ceiling
    pub fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, AudioError> {
        request.validate()?;
        let session = self.session(&request.bank_id, request.sample_rate)?;

        let events = schedule(request);
        let total_frames = request.total_frames();
        let mut pcm = PcmBuffer::with_capacity(request.sample_rate, request.format, total_frames);
        let mut left = vec![0.0f32; RENDER_BUFFER_SIZE];
        let mut right = vec![0.0f32; RENDER_BUFFER_SIZE];

        let started = Instant::now();
        {
            let mut synth = session.lock();
            self.render_count.fetch_add(1, Ordering::Relaxed);

            synth.reset();
            synth.program_change(CHANNEL, request.program);

            let mut current = 0usize;
            let mut event_idx = 0usize;
            while current < total_frames {
                // Process any events due at this frame
                while event_idx < events.len() && events[event_idx].frame <= current {
                    let event = events[event_idx];
                    if event.is_note_on {
                        synth.note_on(CHANNEL, event.key, event.velocity);
                    } else {
                        synth.note_off(CHANNEL, event.key);
                    }
                    event_idx += 1;
                }

                // Stop the chunk at the next event so timing is sample-accurate
                let mut end = (current + RENDER_BUFFER_SIZE).min(total_frames);
                if let Some(next) = events.get(event_idx) {
                    end = end.min(next.frame.max(current + 1));
                }
                let len = end - current;

                synth.render(&mut left[..len], &mut right[..len]);
                pcm.push_stereo(&left[..len], &right[..len]);
                current = end;

                if let Some(limit) = self.render_timeout {
                    let elapsed = started.elapsed();
                    if elapsed > limit {
                        synth.reset();
                        return Err(AudioError::SynthesisTimeout { limit, elapsed });
                    }
                }
            }
        }

        let bytes = pcm.to_wav_bytes()?;
        info!(
            notes = request.events.len(),
            frames = total_frames,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendered audio"
        );
        Ok(bytes)
    }

    /// Returns the preset names of a SoundFont bank, or None for the tone engine.
    pub fn instrument_names(&self, bank_id: &str) -> Result<Option<[String; 128]>, AudioError> {
        let bank = self.bank(bank_id)?;
        match bank.kind() {
            BankKind::Tone => Ok(None),
            BankKind::SoundFont => {
                let soundfont = self.soundfont(&bank)?;
                Ok(Some(instrument_names(&soundfont)))
            }
        }
    }

    /// Drops every session and loaded SoundFont.
    pub fn shutdown(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        let soundfonts = std::mem::take(&mut *self.soundfonts.lock());
        info!(
            sessions = sessions.len(),
            soundfonts = soundfonts.len(),
            "Synthesis sessions released"
        );
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn bank(&self, bank_id: &str) -> Result<SampleBank, AudioError> {
        self.banks
            .read()
            .get(bank_id)
            .cloned()
            .ok_or_else(|| AudioError::SynthesisEngine(format!("unknown sample bank '{}'", bank_id)))
    }

    fn soundfont(&self, bank: &SampleBank) -> Result<Arc<SoundFont>, AudioError> {
        let mut soundfonts = self.soundfonts.lock();
        if let Some(soundfont) = soundfonts.get(bank.id()) {
            return Ok(Arc::clone(soundfont));
        }
        let path = bank.path().ok_or_else(|| {
            AudioError::SynthesisEngine(format!("bank '{}' has no backing file", bank.id()))
        })?;
        let soundfont = load_soundfont(path)?;
        info!(path = %path.display(), presets = soundfont.get_presets().len(), "Loaded SoundFont");
        soundfonts.insert(bank.id().to_string(), Arc::clone(&soundfont));
        Ok(soundfont)
    }

    fn session(&self, bank_id: &str, sample_rate: u32) -> Result<SharedSession, AudioError> {
        let key = (bank_id.to_string(), sample_rate);
        if let Some(session) = self.sessions.lock().get(&key) {
            return Ok(Arc::clone(session));
        }

        // Built outside the sessions lock; loading a SoundFont can be slow.
        let bank = self.bank(bank_id)?;
        let synth: Box<dyn Synth> = match bank.kind() {
            BankKind::Tone => Box::new(ToneSynth::new(sample_rate)),
            BankKind::SoundFont => Box::new(SoundFontSynth::new(&self.soundfont(&bank)?, sample_rate)?),
        };
        debug!(bank = bank_id, sample_rate, "Opened synthesis session");

        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(synth)));
        Ok(Arc::clone(session))
    }
}

impl Drop for NoteRenderer {
    fn drop(&mut self) {
        self.sessions.get_mut().clear();
        self.soundfonts.get_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bank::BUILTIN_TONE_ID;
    use crate::audio::request::{NoteEvent, OutputFormat, RELEASE_TAIL};
    use crate::audio::wav::WavInfo;
    use crate::music::Pitch;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn note(name: &str, onset: u64, duration: u64) -> NoteEvent {
        NoteEvent::new(Pitch::parse(name).unwrap(), ms(onset), ms(duration))
    }

    fn tone_renderer() -> NoteRenderer {
        let renderer = NoteRenderer::new(None);
        renderer.register_bank(SampleBank::builtin_tone());
        renderer
    }

    #[test]
    fn test_schedule_orders_off_before_on() {
        let request = RenderRequest::new(
            vec![note("C4", 0, 500), note("C4", 500, 500)],
            BUILTIN_TONE_ID,
        );
        let events = schedule(&request);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].frame, 0);
        assert!(events[0].is_note_on);
        // Both at 500 ms: the off comes first
        assert_eq!(events[1].frame, 22050);
        assert!(!events[1].is_note_on);
        assert_eq!(events[2].frame, 22050);
        assert!(events[2].is_note_on);
        assert_eq!(events[3].frame, 44100);
    }

    #[test]
    fn test_single_note_length() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(vec![note("A4", 0, 500)], BUILTIN_TONE_ID);
        let info = WavInfo::from_bytes(&renderer.render(&request).unwrap()).unwrap();
        assert!(info.frames as usize >= duration_to_frames(ms(500) + RELEASE_TAIL, 44100));
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 44100);
    }

    #[test]
    fn test_staggered_length_includes_second_note() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(
            vec![note("C4", 0, 300), note("G4", 500, 700)],
            BUILTIN_TONE_ID,
        );
        let info = WavInfo::from_bytes(&renderer.render(&request).unwrap()).unwrap();
        let expected = duration_to_frames(ms(500) + ms(700) + RELEASE_TAIL, 44100);
        assert!(info.frames as usize >= expected);
    }

    #[test]
    fn test_harmonic_length_is_max_not_sum() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(
            vec![note("C4", 0, 800), note("E4", 0, 800)],
            BUILTIN_TONE_ID,
        );
        let info = WavInfo::from_bytes(&renderer.render(&request).unwrap()).unwrap();
        assert_eq!(
            info.frames as usize,
            duration_to_frames(ms(800) + RELEASE_TAIL, 44100)
        );
    }

    #[test]
    fn test_render_is_byte_identical() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(
            vec![note("C4", 0, 800), note("E4", 800, 800)],
            BUILTIN_TONE_ID,
        );
        let first = renderer.render(&request).unwrap();
        let second = renderer.render(&request).unwrap();
        assert_eq!(first, second);
        assert_eq!(renderer.render_count(), 2);

        // A fresh session gives the same bytes as a reused one
        let other = tone_renderer();
        assert_eq!(other.render(&request).unwrap(), first);
    }

    #[test]
    fn test_sessions_are_reused_per_rate() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(vec![note("C4", 0, 100)], BUILTIN_TONE_ID);
        renderer.render(&request).unwrap();
        renderer.render(&request).unwrap();
        assert_eq!(renderer.session_count(), 1);
        renderer.render(&request.clone().with_sample_rate(22050)).unwrap();
        assert_eq!(renderer.session_count(), 2);
        renderer.shutdown();
        assert_eq!(renderer.session_count(), 0);
    }

    #[test]
    fn test_mono_output() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(vec![note("C4", 0, 100)], BUILTIN_TONE_ID)
            .with_format(OutputFormat::WavMono16);
        let info = WavInfo::from_bytes(&renderer.render(&request).unwrap()).unwrap();
        assert_eq!(info.channels, 1);
    }

    #[test]
    fn test_invalid_request_never_reaches_engine() {
        let renderer = tone_renderer();
        let request = RenderRequest::new(vec![], BUILTIN_TONE_ID);
        assert!(matches!(
            renderer.render(&request),
            Err(AudioError::InvalidRenderRequest(_))
        ));
        assert_eq!(renderer.render_count(), 0);
        assert_eq!(renderer.session_count(), 0);
    }

    #[test]
    fn test_unknown_bank() {
        let renderer = NoteRenderer::new(None);
        let request = RenderRequest::new(vec![note("C4", 0, 100)], "missing");
        assert!(matches!(
            renderer.render(&request),
            Err(AudioError::SynthesisEngine(_))
        ));
    }

    #[test]
    fn test_timeout() {
        let renderer = NoteRenderer::new(Some(Duration::from_nanos(1)));
        renderer.register_bank(SampleBank::builtin_tone());
        let request = RenderRequest::new(vec![note("C4", 0, 10_000)], BUILTIN_TONE_ID);
        assert!(matches!(
            renderer.render(&request),
            Err(AudioError::SynthesisTimeout { .. })
        ));
    }

    #[test]
    fn test_soundfont_instrument_names_report_load_errors() {
        use crate::audio::bank::SampleBankResolver;
        use std::io::Write;

        // A RIFF/sfbk header passes resolution but is not a loadable SoundFont
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.sf2");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"RIFF").unwrap();
        file.write_all(&8u32.to_le_bytes()).unwrap();
        file.write_all(b"sfbkLIST").unwrap();
        drop(file);

        let bank = SampleBankResolver::default().resolve(&path).unwrap();
        let renderer = NoteRenderer::new(None);
        renderer.register_bank(bank.clone());
        assert!(matches!(
            renderer.instrument_names(bank.id()),
            Err(AudioError::SynthesisEngine(_))
        ));
    }

    #[test]
    fn test_tone_bank_has_no_instrument_names() {
        let renderer = tone_renderer();
        assert!(renderer.instrument_names(BUILTIN_TONE_ID).unwrap().is_none());
        assert!(renderer.instrument_names("missing").is_err());
    }
}
