//! Configuration for the crier client
//!
//! Configuration is assembled from environment variables (`CRIER_*`,
//! with `.env` support via dotenvy) and optionally a YAML file.
//! Environment variables override YAML values, which override built-in
//! defaults. The final configuration is validated after merging.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging environment and YAML configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use crier::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load a YAML file, still honoring environment overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Dashboard at {}", config.base_url);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::cache::CacheBounds;
use crate::core::speech::SpeechSessionConfig;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

/// Client configuration
///
/// Everything the client needs to reach the dashboard, bound its two
/// caches, and shape playback:
/// - Dashboard endpoints (HTTP base, WebSocket root, auth token)
/// - Cache directory and per-instance bounds
/// - Speech session timing
/// - Playback pacing, quiet mode, and the notification sound table
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Dashboard endpoints
    pub base_url: String,
    /// Explicit WebSocket root, e.g. `ws://localhost:8000/ws`.
    ///
    /// Derived from `base_url` when unset.
    pub ws_url: Option<String>,
    /// Token sent in the event-channel auth frame.
    pub auth_token: Option<String>,

    // Cache configuration
    /// Root directory for the persistent tier; unset means memory-only.
    pub cache_dir: Option<PathBuf>,
    pub audio_cache: CacheBounds,
    pub message_cache: CacheBounds,

    // Speech session timing
    pub request_timeout_seconds: u64,
    pub first_fragment_seconds: u64,

    // Playback
    pub inter_clip_pause_ms: u64,
    /// Replace notification payload sounds with the soft chime.
    pub quiet: bool,
    pub sounds: SoundTable,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ws_url: None,
            auth_token: None,
            cache_dir: None,
            audio_cache: CacheBounds::audio(),
            message_cache: CacheBounds::messages(),
            request_timeout_seconds: 10,
            first_fragment_seconds: 5,
            inter_clip_pause_ms: 300,
            quiet: false,
            sounds: SoundTable::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file with environment variable overrides
    ///
    /// Loads the YAML file, then applies environment variable overrides
    /// and fills the rest with defaults.
    ///
    /// Priority order (highest to lowest):
    /// 1. Environment variables
    /// 2. YAML file values
    /// 3. Default values
    ///
    /// After merging, the final configuration is validated.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // No .env load here: with an explicit YAML file, only real
        // environment variables override it.
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Settings for the speech synthesis session.
    pub fn speech(&self) -> SpeechSessionConfig {
        SpeechSessionConfig {
            base_url: self.base_url.clone(),
            ws_url: self.ws_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            first_fragment_timeout: Duration::from_secs(self.first_fragment_seconds),
        }
    }

    /// WebSocket root shared by the speech and event channels.
    ///
    /// Uses `ws_url` when set, otherwise swaps the scheme of `base_url`
    /// and appends `/ws`.
    pub fn ws_root(&self) -> String {
        match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let base = self.base_url.trim_end_matches('/');
                let derived = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    base.to_string()
                };
                format!("{derived}/ws")
            }
        }
    }

    /// URL of the dashboard event channel for the given session.
    pub fn events_endpoint(&self, session_id: &str) -> String {
        format!("{}/queue/{session_id}", self.ws_root())
    }
}

/// Locations of the stock notification sounds.
///
/// Server-relative paths (leading `/`) resolve against the dashboard
/// base URL at playback time; full URLs and local paths pass through.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundTable {
    pub low_priority: String,
    pub high_priority: String,
    pub error: String,
    /// Soft chime used for quiet mode and as the audio-update default.
    pub chime: String,
}

impl Default for SoundTable {
    fn default() -> Self {
        Self {
            low_priority: "/static/audio/notification-low-priority.mp3".to_string(),
            high_priority: "/static/audio/notification-high-priority.mp3".to_string(),
            error: "/static/audio/notification-error.mp3".to_string(),
            chime: "/static/audio/gentle-gong.mp3".to_string(),
        }
    }
}

impl SoundTable {
    /// Sound for a notification priority label.
    ///
    /// Unknown labels get the low-priority sound.
    pub fn for_priority(&self, label: &str) -> &str {
        match label {
            "urgent" | "high" => &self.high_priority,
            "error" => &self.error,
            _ => &self.low_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("CRIER_BASE_URL");
            env::remove_var("CRIER_WS_URL");
            env::remove_var("CRIER_AUTH_TOKEN");
            env::remove_var("CRIER_CACHE_DIR");
            env::remove_var("CRIER_AUDIO_CACHE_MAX_BYTES");
            env::remove_var("CRIER_AUDIO_CACHE_MAX_AGE_MS");
            env::remove_var("CRIER_AUDIO_CACHE_MAX_ENTRIES");
            env::remove_var("CRIER_MESSAGE_CACHE_MAX_BYTES");
            env::remove_var("CRIER_MESSAGE_CACHE_MAX_AGE_MS");
            env::remove_var("CRIER_MESSAGE_CACHE_MAX_ENTRIES");
            env::remove_var("CRIER_REQUEST_TIMEOUT_SECONDS");
            env::remove_var("CRIER_FIRST_FRAGMENT_SECONDS");
            env::remove_var("CRIER_INTER_CLIP_PAUSE_MS");
            env::remove_var("CRIER_QUIET");
            env::remove_var("CRIER_SOUND_LOW");
            env::remove_var("CRIER_SOUND_HIGH");
            env::remove_var("CRIER_SOUND_ERROR");
            env::remove_var("CRIER_SOUND_CHIME");
        }
    }

    #[test]
    fn test_speech_settings_map_timeouts() {
        let config = ClientConfig {
            request_timeout_seconds: 20,
            first_fragment_seconds: 3,
            ..Default::default()
        };

        let speech = config.speech();
        assert_eq!(speech.base_url, "http://localhost:8000");
        assert_eq!(speech.request_timeout, Duration::from_secs(20));
        assert_eq!(speech.first_fragment_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_ws_root_derived_from_base_url() {
        let config = ClientConfig {
            base_url: "http://dash.local:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.ws_root(), "ws://dash.local:8000/ws");

        let secure = ClientConfig {
            base_url: "https://dash.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(secure.ws_root(), "wss://dash.example.com/ws");
    }

    #[test]
    fn test_ws_root_explicit() {
        let config = ClientConfig {
            ws_url: Some("wss://dash.example.com/socket/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.ws_root(), "wss://dash.example.com/socket");
    }

    #[test]
    fn test_events_endpoint() {
        let config = ClientConfig::default();
        assert_eq!(
            config.events_endpoint("sess-1"),
            "ws://localhost:8000/ws/queue/sess-1"
        );
    }

    #[test]
    fn test_sound_table_priority_mapping() {
        let sounds = SoundTable::default();
        assert_eq!(sounds.for_priority("urgent"), sounds.high_priority);
        assert_eq!(sounds.for_priority("high"), sounds.high_priority);
        assert_eq!(sounds.for_priority("medium"), sounds.low_priority);
        assert_eq!(sounds.for_priority("low"), sounds.low_priority);
        assert_eq!(sounds.for_priority("error"), sounds.error);
        assert_eq!(sounds.for_priority("whatever"), sounds.low_priority);
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
dashboard:
  base_url: "http://dash.internal:9000"
  auth_token: "yaml-token"

cache:
  dir: "/tmp/crier-cache"
  messages:
    max_entries: 250

playback:
  quiet: true
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();

        assert_eq!(config.base_url, "http://dash.internal:9000");
        assert_eq!(config.auth_token, Some("yaml-token".to_string()));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/crier-cache")));
        assert_eq!(config.message_cache.max_entries, Some(250));
        assert!(config.quiet);
        // untouched sections keep defaults
        assert_eq!(config.audio_cache.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.inter_clip_pause_ms, 300);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_env_overrides_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
dashboard:
  base_url: "http://yaml-host:9000"

speech:
  request_timeout_seconds: 30
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("CRIER_BASE_URL", "http://env-host:8000");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // ENV overrides YAML
        assert_eq!(config.base_url, "http://env-host:8000");
        // YAML value used when no ENV
        assert_eq!(config.request_timeout_seconds, 30);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ClientConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_zero_bounds() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
cache:
  audio:
    max_bytes: 0
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let result = ClientConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("audio cache"));

        cleanup_env_vars();
    }
}
