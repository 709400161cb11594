use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// Every field is optional so partial files work; environment variables
/// can override any value specified here.
///
/// # Example YAML structure
/// ```yaml
/// dashboard:
///   base_url: "http://localhost:8000"
///   ws_url: "ws://localhost:8000/ws"
///   auth_token: "your-token"
///
/// cache:
///   dir: "/var/cache/crier"
///   audio:
///     max_bytes: 52428800
///     max_age_ms: 604800000
///   messages:
///     max_bytes: 10485760
///     max_age_ms: 2592000000
///     max_entries: 1000
///
/// speech:
///   request_timeout_seconds: 10
///   first_fragment_seconds: 5
///
/// playback:
///   inter_clip_pause_ms: 300
///   quiet: false
///
/// sounds:
///   low_priority: "/static/audio/notification-low-priority.mp3"
///   high_priority: "/static/audio/notification-high-priority.mp3"
///   error: "/static/audio/notification-error.mp3"
///   chime: "/static/audio/gentle-gong.mp3"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub dashboard: Option<DashboardYaml>,
    pub cache: Option<CacheYaml>,
    pub speech: Option<SpeechYaml>,
    pub playback: Option<PlaybackYaml>,
    pub sounds: Option<SoundsYaml>,
}

/// Dashboard endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DashboardYaml {
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
    pub auth_token: Option<String>,
}

/// Cache configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheYaml {
    pub dir: Option<String>,
    pub audio: Option<BoundsYaml>,
    pub messages: Option<BoundsYaml>,
}

/// Bounds for one cache instance from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BoundsYaml {
    pub max_bytes: Option<u64>,
    pub max_age_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

/// Speech session timing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpeechYaml {
    pub request_timeout_seconds: Option<u64>,
    pub first_fragment_seconds: Option<u64>,
}

/// Playback configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub inter_clip_pause_ms: Option<u64>,
    pub quiet: Option<bool>,
}

/// Notification sound locations from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SoundsYaml {
    pub low_priority: Option<String>,
    pub high_priority: Option<String>,
    pub error: Option<String>,
    pub chime: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is
    /// malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
dashboard:
  base_url: "http://dash.internal:9000"
  ws_url: "ws://dash.internal:9000/ws"
  auth_token: "tok"

cache:
  dir: "/tmp/crier"
  audio:
    max_bytes: 1048576
    max_age_ms: 60000
  messages:
    max_bytes: 2048
    max_entries: 100

speech:
  request_timeout_seconds: 15
  first_fragment_seconds: 4

playback:
  inter_clip_pause_ms: 150
  quiet: true

sounds:
  low_priority: "/audio/low.mp3"
  error: "/audio/err.mp3"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let dashboard = config.dashboard.as_ref().unwrap();
        assert_eq!(dashboard.base_url, Some("http://dash.internal:9000".to_string()));
        assert_eq!(dashboard.auth_token, Some("tok".to_string()));

        let cache = config.cache.as_ref().unwrap();
        assert_eq!(cache.dir, Some("/tmp/crier".to_string()));
        assert_eq!(cache.audio.as_ref().unwrap().max_bytes, Some(1048576));
        assert_eq!(cache.audio.as_ref().unwrap().max_entries, None);
        assert_eq!(cache.messages.as_ref().unwrap().max_entries, Some(100));

        assert_eq!(
            config.speech.as_ref().unwrap().request_timeout_seconds,
            Some(15)
        );
        assert_eq!(config.playback.as_ref().unwrap().quiet, Some(true));

        let sounds = config.sounds.as_ref().unwrap();
        assert_eq!(sounds.low_priority, Some("/audio/low.mp3".to_string()));
        assert!(sounds.high_priority.is_none());
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
playback:
  quiet: true
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.dashboard.is_none());
        assert!(config.cache.is_none());
        assert_eq!(config.playback.as_ref().unwrap().quiet, Some(true));
        assert!(config.playback.as_ref().unwrap().inter_clip_pause_ms.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap();

        assert!(config.dashboard.is_none());
        assert!(config.cache.is_none());
        assert!(config.speech.is_none());
        assert!(config.playback.is_none());
        assert!(config.sounds.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
dashboard:
  base_url: "http://localhost:9000"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.dashboard.as_ref().unwrap().base_url,
            Some("http://localhost:9000".to_string())
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "dashboard: [not: a: mapping").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
