use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub session: SessionSettings,
}

/// Backend endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL for REST calls (auth refresh, settings, voice previews).
    pub base_url: String,
    /// WebSocket URL for the realtime voice session.
    pub realtime_url: String,
}

/// Audio capture and speech detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub speech_threshold: f32,
    pub min_speech_ms: u32,
    pub silence_duration_ms: u32,
}

/// Voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub language: String,
    pub voice: String,
    pub role: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.voxlink.uz".to_string(),
            realtime_url: "wss://api.voxlink.uz/realtime".to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            speech_threshold: defaults::SPEECH_THRESHOLD,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            role: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file
    /// doesn't exist.
    ///
    /// Only returns defaults if the file is missing; invalid TOML is
    /// still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLINK_SERVER_URL → server.base_url
    /// - VOXLINK_REALTIME_URL → server.realtime_url
    /// - VOXLINK_LANGUAGE → session.language
    /// - VOXLINK_VOICE → session.voice
    /// - VOXLINK_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("VOXLINK_SERVER_URL")
            && !url.is_empty()
        {
            self.server.base_url = url;
        }

        if let Ok(url) = std::env::var("VOXLINK_REALTIME_URL")
            && !url.is_empty()
        {
            self.server.realtime_url = url;
        }

        if let Ok(language) = std::env::var("VOXLINK_LANGUAGE")
            && !language.is_empty()
        {
            self.session.language = language;
        }

        if let Ok(voice) = std::env::var("VOXLINK_VOICE")
            && !voice.is_empty()
        {
            self.session.voice = voice;
        }

        if let Ok(device) = std::env::var("VOXLINK_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxlink/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxlink").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxlink_env() {
        remove_env("VOXLINK_SERVER_URL");
        remove_env("VOXLINK_REALTIME_URL");
        remove_env("VOXLINK_LANGUAGE");
        remove_env("VOXLINK_VOICE");
        remove_env("VOXLINK_AUDIO_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.base_url, "https://api.voxlink.uz");
        assert_eq!(config.server.realtime_url, "wss://api.voxlink.uz/realtime");

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.speech_threshold, 0.03);
        assert_eq!(config.audio.min_speech_ms, 100);
        assert_eq!(config.audio.silence_duration_ms, 1200);

        assert_eq!(config.session.language, "uz-UZ");
        assert_eq!(config.session.voice, "default");
        assert_eq!(config.session.role, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [server]
            base_url = "https://staging.voxlink.uz"
            realtime_url = "wss://staging.voxlink.uz/realtime"

            [audio]
            device = "pipewire"
            sample_rate = 48000
            speech_threshold = 0.05
            min_speech_ms = 150
            silence_duration_ms = 2000

            [session]
            language = "en-US"
            voice = "aria"
            role = "translator"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.base_url, "https://staging.voxlink.uz");
        assert_eq!(config.audio.device, Some("pipewire".to_string()));
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.speech_threshold, 0.05);
        assert_eq!(config.audio.min_speech_ms, 150);
        assert_eq!(config.audio.silence_duration_ms, 2000);
        assert_eq!(config.session.language, "en-US");
        assert_eq!(config.session.voice, "aria");
        assert_eq!(config.session.role, Some("translator".to_string()));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [session]
            language = "ru-RU"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.session.language, "ru-RU");

        // Everything else should be defaults
        assert_eq!(config.server.base_url, "https://api.voxlink.uz");
        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.speech_threshold, 0.03);
        assert_eq!(config.session.voice, "default");
    }

    #[test]
    fn test_env_override_language() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxlink_env();

        set_env("VOXLINK_LANGUAGE", "en-US");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.language, "en-US");
        assert_eq!(config.session.voice, "default"); // Not overridden

        clear_voxlink_env();
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxlink_env();

        set_env("VOXLINK_SERVER_URL", "https://dev.voxlink.uz");
        set_env("VOXLINK_REALTIME_URL", "ws://localhost:8080/realtime");
        set_env("VOXLINK_LANGUAGE", "kaa-UZ");
        set_env("VOXLINK_VOICE", "dilnoza");
        set_env("VOXLINK_AUDIO_DEVICE", "pulse");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.base_url, "https://dev.voxlink.uz");
        assert_eq!(config.server.realtime_url, "ws://localhost:8080/realtime");
        assert_eq!(config.session.language, "kaa-UZ");
        assert_eq!(config.session.voice, "dilnoza");
        assert_eq!(config.audio.device, Some("pulse".to_string()));

        clear_voxlink_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxlink_env();

        set_env("VOXLINK_LANGUAGE", "");
        let config = Config::default().with_env_overrides();

        // Empty string should not override default
        assert_eq!(config.session.language, "uz-UZ");

        clear_voxlink_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [server
            base_url = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());

        assert!(result.is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path().unwrap();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("voxlink"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxlink_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let invalid_toml = r#"
            [server
            base_url = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }
}
