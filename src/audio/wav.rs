//! PCM buffers and WAV encoding.

use super::request::OutputFormat;
use crate::error::AudioError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Interleaved 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

/// Convert f32 (-1.0 to 1.0) to i16.
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

impl PcmBuffer {
    /// Creates an empty buffer with room for `frames` frames.
    pub fn with_capacity(sample_rate: u32, format: OutputFormat, frames: usize) -> Self {
        let channels = format.channels();
        Self {
            sample_rate,
            channels,
            samples: Vec::with_capacity(frames * channels as usize),
        }
    }

    /// Builds a buffer from planar stereo float samples.
    pub fn from_stereo(left: &[f32], right: &[f32], sample_rate: u32, format: OutputFormat) -> Self {
        let mut pcm = Self::with_capacity(sample_rate, format, left.len());
        pcm.push_stereo(left, right);
        pcm
    }

    /// Appends planar stereo float samples.
    ///
    /// Mono output averages the two channels.
    pub fn push_stereo(&mut self, left: &[f32], right: &[f32]) {
        if self.channels == 1 {
            self.samples
                .extend(left.iter().zip(right).map(|(l, r)| to_i16((l + r) * 0.5)));
        } else {
            for (l, r) in left.iter().zip(right) {
                self.samples.push(to_i16(*l));
                self.samples.push(to_i16(*r));
            }
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Encodes the buffer as a 16-bit PCM WAV file in memory.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisEngine` if the encoder rejects the data.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, AudioError> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
            let mut pcm = writer.get_i16_writer(self.samples.len() as u32);
            for &sample in &self.samples {
                pcm.write_sample(sample);
            }
            pcm.flush().map_err(encode_error)?;
            writer.finalize().map_err(encode_error)?;
        }
        Ok(cursor.into_inner())
    }
}

fn encode_error(e: hound::Error) -> AudioError {
    AudioError::SynthesisEngine(format!("WAV encoding failed: {}", e))
}

/// Basic facts about a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Frames per channel.
    pub frames: u32,
}

impl WavInfo {
    /// Reads the header of an in-memory WAV file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, hound::Error> {
        Ok(Self::from_reader(&WavReader::new(Cursor::new(bytes))?))
    }

    /// Reads the header of a WAV file on disk.
    pub fn from_path(path: &Path) -> Result<Self, hound::Error> {
        Ok(Self::from_reader(&WavReader::open(path)?))
    }

    fn from_reader<R: std::io::Read>(reader: &WavReader<R>) -> Self {
        let spec = reader.spec();
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            frames: reader.duration(),
        }
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_interleaving_and_clamping() {
        let left = [0.5, 2.0];
        let right = [-0.5, -2.0];
        let pcm = PcmBuffer::from_stereo(&left, &right, 44100, OutputFormat::WavStereo16);
        assert_eq!(pcm.channels(), 2);
        assert_eq!(pcm.frames(), 2);
        assert_eq!(pcm.samples(), &[16383, -16383, 32767, -32768]);
    }

    #[test]
    fn test_mono_averages_channels() {
        let pcm = PcmBuffer::from_stereo(&[1.0, 0.0], &[0.0, 0.0], 22050, OutputFormat::WavMono16);
        assert_eq!(pcm.channels(), 1);
        assert_eq!(pcm.samples(), &[16383, 0]);
    }

    #[test]
    fn test_chunked_push_matches_single_push() {
        let left: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let whole = PcmBuffer::from_stereo(&left, &right, 44100, OutputFormat::WavStereo16);

        let mut chunked = PcmBuffer::with_capacity(44100, OutputFormat::WavStereo16, left.len());
        for (l, r) in left.chunks(300).zip(right.chunks(300)) {
            chunked.push_stereo(l, r);
        }
        assert_eq!(chunked, whole);
        assert_eq!(chunked.frames(), 1000);
    }

    #[test]
    fn test_wav_header() {
        let frames = 44100;
        let left = vec![0.1f32; frames];
        let pcm = PcmBuffer::from_stereo(&left, &left, 44100, OutputFormat::WavStereo16);
        let bytes = pcm.to_wav_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let info = WavInfo::from_bytes(&bytes).unwrap();
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.frames, frames as u32);
        assert_eq!(info.duration(), Duration::from_secs(1));
    }
}
