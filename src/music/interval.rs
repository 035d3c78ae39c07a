//! Interval table.
//!
//! Intervals are a closed set, so they live in a static table rather than
//! being discovered at runtime.

use super::Pitch;
use crate::error::AudioError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A simple interval within one octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Unison,
    MinorSecond,
    MajorSecond,
    MinorThird,
    MajorThird,
    PerfectFourth,
    AugmentedFourth,
    DiminishedFifth,
    PerfectFifth,
    MinorSixth,
    MajorSixth,
    MinorSeventh,
    MajorSeventh,
    Octave,
}

/// Whether the second note lies above or below the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Interval {
    /// Every interval, smallest first.
    pub const ALL: [Interval; 14] = [
        Interval::Unison,
        Interval::MinorSecond,
        Interval::MajorSecond,
        Interval::MinorThird,
        Interval::MajorThird,
        Interval::PerfectFourth,
        Interval::AugmentedFourth,
        Interval::DiminishedFifth,
        Interval::PerfectFifth,
        Interval::MinorSixth,
        Interval::MajorSixth,
        Interval::MinorSeventh,
        Interval::MajorSeventh,
        Interval::Octave,
    ];

    /// Size of the interval in semitones.
    pub fn semitones(self) -> i16 {
        match self {
            Interval::Unison => 0,
            Interval::MinorSecond => 1,
            Interval::MajorSecond => 2,
            Interval::MinorThird => 3,
            Interval::MajorThird => 4,
            Interval::PerfectFourth => 5,
            Interval::AugmentedFourth | Interval::DiminishedFifth => 6,
            Interval::PerfectFifth => 7,
            Interval::MinorSixth => 8,
            Interval::MajorSixth => 9,
            Interval::MinorSeventh => 10,
            Interval::MajorSeventh => 11,
            Interval::Octave => 12,
        }
    }

    /// Snake-case identifier, e.g. "major_third".
    pub fn key(self) -> &'static str {
        match self {
            Interval::Unison => "unison",
            Interval::MinorSecond => "minor_second",
            Interval::MajorSecond => "major_second",
            Interval::MinorThird => "minor_third",
            Interval::MajorThird => "major_third",
            Interval::PerfectFourth => "perfect_fourth",
            Interval::AugmentedFourth => "augmented_fourth",
            Interval::DiminishedFifth => "diminished_fifth",
            Interval::PerfectFifth => "perfect_fifth",
            Interval::MinorSixth => "minor_sixth",
            Interval::MajorSixth => "major_sixth",
            Interval::MinorSeventh => "minor_seventh",
            Interval::MajorSeventh => "major_seventh",
            Interval::Octave => "octave",
        }
    }

    /// Human-readable name, e.g. "Major Third".
    pub fn display_name(self) -> &'static str {
        match self {
            Interval::Unison => "Unison",
            Interval::MinorSecond => "Minor Second",
            Interval::MajorSecond => "Major Second",
            Interval::MinorThird => "Minor Third",
            Interval::MajorThird => "Major Third",
            Interval::PerfectFourth => "Perfect Fourth",
            Interval::AugmentedFourth => "Augmented Fourth",
            Interval::DiminishedFifth => "Diminished Fifth",
            Interval::PerfectFifth => "Perfect Fifth",
            Interval::MinorSixth => "Minor Sixth",
            Interval::MajorSixth => "Major Sixth",
            Interval::MinorSeventh => "Minor Seventh",
            Interval::MajorSeventh => "Major Seventh",
            Interval::Octave => "Octave",
        }
    }

    /// Short answer notation shown as a multiple-choice option
    /// ("J" marks perfect intervals).
    pub fn notation(self) -> &'static str {
        match self {
            Interval::Unison => "1J",
            Interval::MinorSecond => "2m",
            Interval::MajorSecond => "2M",
            Interval::MinorThird => "3m",
            Interval::MajorThird => "3M",
            Interval::PerfectFourth => "4J",
            Interval::AugmentedFourth => "4+",
            Interval::DiminishedFifth => "5°",
            Interval::PerfectFifth => "5J",
            Interval::MinorSixth => "6m",
            Interval::MajorSixth => "6M",
            Interval::MinorSeventh => "7m",
            Interval::MajorSeventh => "7M",
            Interval::Octave => "8J",
        }
    }

    /// Returns the second note of this interval built on `root`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPitch` if the second note would leave the MIDI range.
    pub fn from_root(self, root: Pitch, direction: Direction) -> Result<Pitch, AudioError> {
        let offset = match direction {
            Direction::Ascending => self.semitones(),
            Direction::Descending => -self.semitones(),
        };
        root.transpose(offset).ok_or_else(|| {
            AudioError::InvalidPitch(format!("{} {:?} from {}", self.key(), direction, root))
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Interval {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.key() == wanted || i.notation() == s.trim())
            .ok_or_else(|| AudioError::InvalidRenderRequest(format!("unknown interval '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semitones_monotonic() {
        let sizes: Vec<i16> = Interval::ALL.iter().map(|i| i.semitones()).collect();
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sizes.first(), Some(&0));
        assert_eq!(sizes.last(), Some(&12));
    }

    #[test]
    fn test_from_root() {
        let c4 = Pitch::parse("C4").unwrap();
        let e4 = Interval::MajorThird.from_root(c4, Direction::Ascending).unwrap();
        assert_eq!(e4.name(), "E4");
        let a3 = Interval::MinorThird.from_root(c4, Direction::Descending).unwrap();
        assert_eq!(a3.name(), "A3");
        let c5 = Interval::Octave.from_root(c4, Direction::Ascending).unwrap();
        assert_eq!(c5.name(), "C5");
    }

    #[test]
    fn test_from_root_out_of_range() {
        let top = Pitch::from_midi(125).unwrap();
        let err = Interval::PerfectFifth
            .from_root(top, Direction::Ascending)
            .unwrap_err();
        assert!(matches!(err, AudioError::InvalidPitch(_)));
    }

    #[test]
    fn test_parse() {
        assert_eq!("major_third".parse::<Interval>().unwrap(), Interval::MajorThird);
        assert_eq!("Perfect Fifth".parse::<Interval>().unwrap(), Interval::PerfectFifth);
        assert_eq!("8J".parse::<Interval>().unwrap(), Interval::Octave);
        assert!("ninth".parse::<Interval>().is_err());
    }

    #[test]
    fn test_tritone_spellings_share_size() {
        assert_eq!(
            Interval::AugmentedFourth.semitones(),
            Interval::DiminishedFifth.semitones()
        );
        assert_ne!(
            Interval::AugmentedFourth.notation(),
            Interval::DiminishedFifth.notation()
        );
    }
}
