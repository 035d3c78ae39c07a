//! Service configuration.
//!
//! Settings come from a configuration file, from environment variables,
//! or both (environment wins). Every field has a default so an empty
//! environment yields a usable configuration.
//!
//! Variables prefixed with `AUDIO_` map onto the field of the same name
//! (`AUDIO_CACHE_ENABLED` sets `cache_enabled`). `AUDIO_CACHE_MAX_SIZE`,
//! `SOUNDFONT_PATH`, `MEDIA_ROOT` and `MEDIA_URL` are mapped explicitly.

use crate::audio::cache::CacheLimits;
use crate::audio::synth::EngineKind;
use crate::error::AudioError;
use ::config::{Config, ConfigError, Environment, File, Map};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable names.
pub mod env {
    /// Prefix of variables named after a config field.
    pub const PREFIX: &str = "AUDIO";

    pub const SOUNDFONT_PATH: &str = "SOUNDFONT_PATH";
    pub const AUDIO_ENGINE: &str = "AUDIO_ENGINE";
    pub const MEDIA_ROOT: &str = "MEDIA_ROOT";
    pub const MEDIA_URL: &str = "MEDIA_URL";
    pub const AUDIO_CACHE_ENABLED: &str = "AUDIO_CACHE_ENABLED";
    pub const AUDIO_CACHE_MAX_SIZE: &str = "AUDIO_CACHE_MAX_SIZE";
    pub const AUDIO_CACHE_MAX_BYTES: &str = "AUDIO_CACHE_MAX_BYTES";
    pub const AUDIO_CACHE_MAX_AGE_SECS: &str = "AUDIO_CACHE_MAX_AGE_SECS";
    pub const AUDIO_SAMPLE_RATE: &str = "AUDIO_SAMPLE_RATE";
    pub const AUDIO_RENDER_TIMEOUT_MS: &str = "AUDIO_RENDER_TIMEOUT_MS";
}

/// Variables whose names do not follow the prefix rule, with their field.
const EXPLICIT_VARS: [(&str, &str); 4] = [
    (env::SOUNDFONT_PATH, "soundfont_path"),
    (env::MEDIA_ROOT, "media_root"),
    (env::MEDIA_URL, "media_url"),
    (env::AUDIO_CACHE_MAX_SIZE, "cache_max_count"),
];

/// Configuration for the audio service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Path to the SoundFont file (.sf2). Relative paths resolve against `base_dir`.
    pub soundfont_path: Option<PathBuf>,
    /// Base directory for relative SoundFont paths.
    pub base_dir: Option<PathBuf>,
    /// Which synthesis engine renders notes.
    pub engine: EngineKind,
    /// Root directory for generated files.
    pub media_root: PathBuf,
    /// URL prefix under which `media_root` is served.
    pub media_url: String,
    /// Whether rendered audio is cached and reused.
    pub cache_enabled: bool,
    /// Maximum number of cached files; 0 means unbounded.
    pub cache_max_count: Option<usize>,
    /// Maximum total size of cached files in bytes; 0 means unbounded.
    pub cache_max_bytes: Option<u64>,
    /// Maximum age of cached files in seconds; 0 means unbounded.
    pub cache_max_age_secs: Option<u64>,
    /// Default output sample rate in Hz.
    pub sample_rate: u32,
    /// Ceiling on a single render in milliseconds; 0 disables it.
    pub render_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            soundfont_path: None,
            base_dir: None,
            engine: EngineKind::SoundFont,
            media_root: PathBuf::from("media"),
            media_url: "/media/".to_string(),
            cache_enabled: true,
            cache_max_count: Some(1000),
            cache_max_bytes: None,
            cache_max_age_secs: None,
            sample_rate: crate::audio::request::DEFAULT_SAMPLE_RATE,
            render_timeout_ms: 10_000,
        }
    }
}

fn config_error(e: ConfigError) -> AudioError {
    AudioError::Config(e.to_string())
}

impl AudioConfig {
    /// Builds a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable is present but malformed.
    pub fn from_env() -> Result<Self, AudioError> {
        Self::build(None, std::env::vars())
    }

    /// Builds a configuration from defaults plus the given variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, AudioError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::build(None, vars)
    }

    /// Reads a configuration file (JSON, TOML or YAML by extension), then
    /// applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or parsed, or an
    /// environment value is malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        Self::build(Some(path.as_ref()), std::env::vars())
    }

    fn build<I, K, V>(file: Option<&Path>, vars: I) -> Result<Self, AudioError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix(env::PREFIX).source(Some(vars.clone())));
        for (var, field) in EXPLICIT_VARS {
            builder = builder
                .set_override_option(field, vars.get(var).cloned())
                .map_err(config_error)?;
        }

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error)
    }

    /// Cache bounds derived from the settings.
    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_count: self.cache_max_count.filter(|&n| n > 0),
            max_bytes: self.cache_max_bytes.filter(|&n| n > 0),
            max_age: self.cache_max_age_secs.filter(|&n| n > 0).map(Duration::from_secs),
        }
    }

    /// Render ceiling, or None when disabled.
    pub fn render_timeout(&self) -> Option<Duration> {
        (self.render_timeout_ms > 0).then(|| Duration::from_millis(self.render_timeout_ms))
    }

    /// Directory holding cached artifacts.
    pub fn cache_dir(&self) -> PathBuf {
        self.media_root.join("audio").join("cache")
    }

    /// Directory holding uncached, one-off renders.
    pub fn generated_dir(&self) -> PathBuf {
        self.media_root.join("audio").join("generated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = AudioConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, AudioConfig::default());
        assert!(config.cache_enabled);
        assert_eq!(config.cache_max_count, Some(1000));
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.cache_dir(), PathBuf::from("media/audio/cache"));
        assert_eq!(config.render_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_env_overrides() {
        let config = AudioConfig::from_vars(vars(&[
            ("SOUNDFONT_PATH", "/app/soundfonts/School_Piano_2024.sf2"),
            ("AUDIO_ENGINE", "tone"),
            ("MEDIA_ROOT", "/srv/media"),
            ("AUDIO_CACHE_ENABLED", "False"),
            ("AUDIO_CACHE_MAX_SIZE", "50"),
            ("AUDIO_CACHE_MAX_BYTES", "1048576"),
            ("AUDIO_CACHE_MAX_AGE_SECS", "0"),
            ("AUDIO_SAMPLE_RATE", "48000"),
            ("AUDIO_RENDER_TIMEOUT_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(
            config.soundfont_path,
            Some(PathBuf::from("/app/soundfonts/School_Piano_2024.sf2"))
        );
        assert_eq!(config.engine, EngineKind::Tone);
        assert!(!config.cache_enabled);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(
            config.cache_limits(),
            CacheLimits {
                max_count: Some(50),
                max_bytes: Some(1_048_576),
                max_age: None,
            }
        );
        assert_eq!(config.render_timeout(), None);
        assert_eq!(config.generated_dir(), PathBuf::from("/srv/media/audio/generated"));
    }

    #[test]
    fn test_boolean_spellings() {
        for (value, expected) in [("1", true), ("yes", true), ("on", true), ("0", false), ("off", false)] {
            let config = AudioConfig::from_vars(vars(&[("AUDIO_CACHE_ENABLED", value)])).unwrap();
            assert_eq!(config.cache_enabled, expected, "{}", value);
        }
    }

    #[test]
    fn test_zero_limit_means_unbounded() {
        let config = AudioConfig::from_vars(vars(&[("AUDIO_CACHE_MAX_SIZE", "0")])).unwrap();
        assert_eq!(config.cache_limits().max_count, None);
    }

    #[test]
    fn test_unrelated_variables_are_ignored() {
        let config = AudioConfig::from_vars(vars(&[
            ("PATH", "/usr/bin"),
            ("HOME", "/root"),
            ("AUDIO_UNKNOWN_SETTING", "x"),
        ]))
        .unwrap();
        assert_eq!(config, AudioConfig::default());
    }

    #[test]
    fn test_malformed_values() {
        for (name, value) in [
            ("AUDIO_CACHE_ENABLED", "maybe"),
            ("AUDIO_CACHE_MAX_SIZE", "lots"),
            ("AUDIO_SAMPLE_RATE", "fast"),
            ("AUDIO_ENGINE", "fm"),
        ] {
            let result = AudioConfig::from_vars(vars(&[(name, value)]));
            assert!(matches!(result, Err(AudioError::Config(_))), "{}={}", name, value);
        }
    }

    #[test]
    fn test_json_partial_document() {
        let config: AudioConfig =
            serde_json::from_str(r#"{"engine": "tone", "cache_max_count": 5}"#).unwrap();
        assert_eq!(config.engine, EngineKind::Tone);
        assert_eq!(config.cache_max_count, Some(5));
        assert_eq!(config.media_url, "/media/");
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.json");
        std::fs::write(
            &path,
            r#"{"media_root": "/tmp/m", "sample_rate": 48000, "engine": "soundfont", "cache_max_count": 5}"#,
        )
        .unwrap();

        let config = AudioConfig::build(Some(&path), vars(&[])).unwrap();
        assert_eq!(config.media_root, PathBuf::from("/tmp/m"));
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.cache_max_count, Some(5));

        let config = AudioConfig::build(
            Some(&path),
            vars(&[("AUDIO_SAMPLE_RATE", "22050"), ("AUDIO_CACHE_MAX_SIZE", "7")]),
        )
        .unwrap();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.cache_max_count, Some(7));
        assert_eq!(config.media_root, PathBuf::from("/tmp/m"));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AudioConfig::build(Some(&path), vars(&[])),
            Err(AudioError::Config(_))
        ));
        assert!(AudioConfig::build(Some(&dir.path().join("missing.json")), vars(&[])).is_err());
    }
}
