//! Music-theory primitives for building audio questions.
//!
//! This module provides pitch parsing and naming, and the interval table
//! used to derive the second note of an interval question.

mod interval;
mod pitch;

pub use interval::{Direction, Interval};
pub use pitch::Pitch;

/// Standard note names for display purposes.
/// Maps a MIDI note number modulo 12 to its sharp spelling.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Octave assumed when a note name carries none (e.g. "F#").
pub const DEFAULT_OCTAVE: i16 = 4;

/// Most accidentals a note name may carry (double sharp or double flat).
const MAX_ACCIDENTALS: usize = 2;

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Arguments
///
/// * `note` - MIDI note number (0-127)
///
/// # Returns
///
/// String representation like "C4" or "F#5"
///
/// # Examples
///
/// ```
/// use earsynth::music::note_to_name;
///
/// let name = note_to_name(60); // Middle C
/// assert_eq!(name, "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Returns the semitone offset of a natural note letter from C.
fn letter_semitone(letter: char) -> Option<i16> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// Converts a note name to a MIDI note number.
///
/// Accepts both "C4" and the dashed "C-4" form, up to two `#`/`b`
/// accidentals, and an omitted octave (defaults to [`DEFAULT_OCTAVE`]).
///
/// # Returns
///
/// MIDI note number (0-127) or None if the name is malformed or out of range
pub fn name_to_note(name: &str) -> Option<u8> {
    let name = name.trim();
    let mut chars = name.chars();
    let letter = chars.next()?;
    let mut semitone = letter_semitone(letter)?;

    let rest = chars.as_str();
    let accidentals_end = rest
        .char_indices()
        .find(|(_, c)| *c != '#' && *c != 'b')
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    // Accidentals are ASCII, so the byte offset is also the count
    if accidentals_end > MAX_ACCIDENTALS {
        return None;
    }
    for c in rest[..accidentals_end].chars() {
        semitone += if c == '#' { 1 } else { -1 };
    }

    let octave_part = &rest[accidentals_end..];
    let octave_part = octave_part.strip_prefix('-').unwrap_or(octave_part);
    let octave: i16 = if octave_part.is_empty() {
        if rest[accidentals_end..].starts_with('-') {
            return None;
        }
        DEFAULT_OCTAVE
    } else {
        if !octave_part.chars().all(|c| c.is_ascii_digit()) || octave_part.len() > 2 {
            return None;
        }
        octave_part.parse().ok()?
    };

    // MIDI note = (octave + 1) * 12 + semitone
    let midi_note = (octave + 1) * 12 + semitone;
    if (0..=127).contains(&midi_note) {
        Some(midi_note as u8)
    } else {
        None
    }
}
