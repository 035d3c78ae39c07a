//! Pitch representation.
//!
//! A pitch is a MIDI note number that has already been range-checked, so
//! everything downstream of parsing can hand it to the synthesizer as-is.

use super::{name_to_note, note_to_name};
use crate::error::AudioError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest MIDI note number.
pub const MAX_MIDI_NOTE: u8 = 127;

/// A MIDI note number in 0..=127. 60 = Middle C (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Pitch(u8);

impl Pitch {
    /// Middle C.
    pub const MIDDLE_C: Pitch = Pitch(60);

    /// Creates a pitch from a MIDI note number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPitch` when `note` is above 127.
    pub fn from_midi(note: u8) -> Result<Self, AudioError> {
        if note > MAX_MIDI_NOTE {
            return Err(AudioError::InvalidPitch(note.to_string()));
        }
        Ok(Self(note))
    }

    /// Parses a note name such as "C4", "C-4", "F#5" or "Bb".
    ///
    /// # Errors
    ///
    /// Returns `InvalidPitch` if the name is malformed or falls outside
    /// the MIDI range.
    pub fn parse(name: &str) -> Result<Self, AudioError> {
        name_to_note(name)
            .map(Self)
            .ok_or_else(|| AudioError::InvalidPitch(name.to_string()))
    }

    /// Returns the MIDI note number.
    pub fn midi(self) -> u8 {
        self.0
    }

    /// Returns the sharp-spelled name, e.g. "C#4".
    pub fn name(self) -> String {
        note_to_name(self.0)
    }

    /// Equal-tempered frequency in Hz with A4 = 440 Hz.
    pub fn frequency(self) -> f64 {
        440.0 * 2f64.powf((self.0 as f64 - 69.0) / 12.0)
    }

    /// Transposes by a number of semitones.
    ///
    /// # Returns
    ///
    /// None if the result leaves the MIDI range
    pub fn transpose(self, semitones: i16) -> Option<Self> {
        let new_pitch = self.0 as i16 + semitones;
        if (0..=MAX_MIDI_NOTE as i16).contains(&new_pitch) {
            Some(Self(new_pitch as u8))
        } else {
            None
        }
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Pitch {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<u8> for Pitch {
    type Error = AudioError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_midi(value)
    }
}

impl From<Pitch> for u8 {
    fn from(pitch: Pitch) -> Self {
        pitch.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_name() {
        let pitch = Pitch::parse("C-4").unwrap();
        assert_eq!(pitch, Pitch::MIDDLE_C);
        assert_eq!(pitch.name(), "C4");
        assert_eq!(Pitch::parse("Db4").unwrap().name(), "C#4");
    }

    #[test]
    fn test_from_midi_range() {
        assert!(Pitch::from_midi(0).is_ok());
        assert!(Pitch::from_midi(127).is_ok());
        let err = Pitch::from_midi(128).unwrap_err();
        assert!(matches!(err, AudioError::InvalidPitch(_)));
    }

    #[test]
    fn test_parse_out_of_range() {
        let err = Pitch::parse("A9").unwrap_err();
        assert!(matches!(err, AudioError::InvalidPitch(ref s) if s == "A9"));
    }

    #[test]
    fn test_frequency() {
        let a4 = Pitch::parse("A4").unwrap();
        assert!((a4.frequency() - 440.0).abs() < 1e-9);
        let a5 = Pitch::parse("A5").unwrap();
        assert!((a5.frequency() - 880.0).abs() < 1e-9);
        let c4 = Pitch::MIDDLE_C;
        assert!((c4.frequency() - 261.6256).abs() < 0.001);
    }

    #[test]
    fn test_transpose() {
        let c4 = Pitch::MIDDLE_C;
        assert_eq!(c4.transpose(12).unwrap().name(), "C5");
        assert_eq!(c4.transpose(-12).unwrap().name(), "C3");
        assert!(Pitch::from_midi(120).unwrap().transpose(12).is_none());
        assert!(Pitch::from_midi(3).unwrap().transpose(-4).is_none());
    }

    #[test]
    fn test_serde_rejects_out_of_range() {
        let ok: Pitch = serde_json::from_str("64").unwrap();
        assert_eq!(ok.midi(), 64);
        assert!(serde_json::from_str::<Pitch>("200").is_err());
    }
}
