//! Sample bank resolution.
//!
//! Locates the configured SoundFont on disk, checks that it really is a
//! SoundFont, and fingerprints its contents. Loading the bank into the
//! synthesizer happens later, lazily, inside the renderer.

use crate::error::AudioError;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifier of the built-in tone engine's pseudo bank.
pub const BUILTIN_TONE_ID: &str = "builtin-tone-v1";

/// File extension expected for SoundFont banks.
const SOUNDFONT_EXTENSION: &str = "sf2";

/// What kind of engine a bank feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankKind {
    /// A SoundFont 2 file rendered through rustysynth.
    SoundFont,
    /// The built-in additive tone voice; has no backing file.
    Tone,
}

/// A resolved, immutable sample bank.
///
/// The `id` is a content fingerprint, so two paths pointing at identical
/// bytes share one identity and a bank edited in place gets a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBank {
    id: String,
    path: Option<PathBuf>,
    size_bytes: u64,
    kind: BankKind,
}

impl SampleBank {
    /// The pseudo bank used by the tone engine.
    pub fn builtin_tone() -> Self {
        Self {
            id: BUILTIN_TONE_ID.to_string(),
            path: None,
            size_bytes: 0,
            kind: BankKind::Tone,
        }
    }

    /// Content identifier used in cache keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the backing file in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Engine kind this bank feeds.
    pub fn kind(&self) -> BankKind {
        self.kind
    }
}

/// Resolves configured bank paths into [`SampleBank`]s.
#[derive(Debug, Clone, Default)]
pub struct SampleBankResolver {
    /// Base directory for relative paths.
    base_dir: Option<PathBuf>,
}

impl SampleBankResolver {
    /// Creates a resolver; relative paths are joined onto `base_dir`.
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    /// Resolves and validates a SoundFont path.
    ///
    /// # Errors
    ///
    /// Returns `MissingSampleBank` if the path is empty, missing, not a
    /// regular file, unreadable, has the wrong extension, or does not
    /// carry a SoundFont RIFF header.
    pub fn resolve(&self, configured_path: impl AsRef<Path>) -> Result<SampleBank, AudioError> {
        let configured = configured_path.as_ref();
        if configured.as_os_str().is_empty() {
            return Err(missing(configured, "no sample bank path configured"));
        }

        let path = match (&self.base_dir, configured.is_relative()) {
            (Some(base), true) => base.join(configured),
            _ => configured.to_path_buf(),
        };

        let metadata = std::fs::metadata(&path).map_err(|e| missing(&path, e.to_string()))?;
        if !metadata.is_file() {
            return Err(missing(&path, "not a regular file"));
        }

        let extension_ok = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SOUNDFONT_EXTENSION));
        if !extension_ok {
            return Err(missing(&path, "expected a .sf2 file"));
        }

        let file = File::open(&path).map_err(|e| missing(&path, e.to_string()))?;
        let mut reader = BufReader::new(file);
        check_signature(&mut reader).map_err(|reason| missing(&path, reason))?;

        // The header bytes already consumed are hashed too.
        let file = File::open(&path).map_err(|e| missing(&path, e.to_string()))?;
        let id = fingerprint(file).map_err(|e| missing(&path, e.to_string()))?;

        info!(path = %path.display(), id = %&id[..12], bytes = metadata.len(), "Resolved sample bank");

        Ok(SampleBank {
            id,
            path: Some(path),
            size_bytes: metadata.len(),
            kind: BankKind::SoundFont,
        })
    }
}

fn missing(path: &Path, reason: impl Into<String>) -> AudioError {
    AudioError::MissingSampleBank {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Checks for `RIFF <size> sfbk` at the start of the file.
fn check_signature<R: Read>(reader: &mut R) -> Result<(), String> {
    let mut header = [0u8; 12];
    reader
        .read_exact(&mut header)
        .map_err(|_| "file too short to be a SoundFont".to_string())?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"sfbk" {
        return Err("not a SoundFont (missing RIFF/sfbk header)".to_string());
    }
    debug!(
        riff_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
        "SoundFont header ok"
    );
    Ok(())
}

/// BLAKE3 digest of the whole stream, as lowercase hex.
fn fingerprint<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fake_soundfont(dir: &Path, name: &str, payload: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(b"RIFF").unwrap();
        file.write_all(&(4 + payload.len() as u32).to_le_bytes()).unwrap();
        file.write_all(b"sfbk").unwrap();
        file.write_all(payload).unwrap();
        path
    }

    #[test]
    fn test_resolve_valid_bank() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fake_soundfont(dir.path(), "piano.sf2", b"LIST");
        let bank = SampleBankResolver::default().resolve(&path).unwrap();
        assert_eq!(bank.path(), Some(path.as_path()));
        assert_eq!(bank.id().len(), 64);
        assert_eq!(bank.size_bytes(), 16);
        assert_eq!(bank.kind(), BankKind::SoundFont);
    }

    #[test]
    fn test_resolve_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("soundfonts")).unwrap();
        write_fake_soundfont(&dir.path().join("soundfonts"), "piano.SF2", b"");
        let resolver = SampleBankResolver::new(Some(dir.path().to_path_buf()));
        let bank = resolver.resolve("soundfonts/piano.SF2").unwrap();
        assert!(bank.path().unwrap().starts_with(dir.path()));
    }

    #[test]
    fn test_identity_follows_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_fake_soundfont(dir.path(), "a.sf2", b"same");
        let b = write_fake_soundfont(dir.path(), "b.sf2", b"same");
        let c = write_fake_soundfont(dir.path(), "c.sf2", b"different");
        let resolver = SampleBankResolver::default();
        let (a, b, c) = (
            resolver.resolve(a).unwrap(),
            resolver.resolve(b).unwrap(),
            resolver.resolve(c).unwrap(),
        );
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_missing_and_empty_paths() {
        let resolver = SampleBankResolver::default();
        assert!(matches!(
            resolver.resolve("/nonexistent/path.sf2"),
            Err(AudioError::MissingSampleBank { .. })
        ));
        assert!(matches!(
            resolver.resolve(""),
            Err(AudioError::MissingSampleBank { .. })
        ));
    }

    #[test]
    fn test_rejects_directory_and_wrong_format() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SampleBankResolver::default();
        assert!(resolver.resolve(dir.path()).is_err());

        let wrong_ext = write_fake_soundfont(dir.path(), "piano.wav", b"");
        assert!(resolver.resolve(wrong_ext).is_err());

        let text = dir.path().join("fake.sf2");
        std::fs::write(&text, "soundfont1 content").unwrap();
        let err = resolver.resolve(&text).unwrap_err();
        assert!(err.to_string().contains("not a SoundFont"));

        let short = dir.path().join("short.sf2");
        std::fs::write(&short, "RIFF").unwrap();
        assert!(resolver.resolve(short).is_err());
    }

    #[test]
    fn test_builtin_tone_bank() {
        let bank = SampleBank::builtin_tone();
        assert_eq!(bank.id(), BUILTIN_TONE_ID);
        assert!(bank.path().is_none());
        assert_eq!(bank.kind(), BankKind::Tone);
    }
}
