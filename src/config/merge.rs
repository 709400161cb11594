use std::env;
use std::path::PathBuf;

use super::utils::{env_u64, parse_bool};
use super::yaml::YamlConfig;
use super::{ClientConfig, SoundTable};
use crate::core::cache::CacheBounds;

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. Environment variables
/// 2. YAML configuration values
/// 3. Default values
///
/// # Arguments
/// * `yaml_config` - Optional YAML configuration to merge under the
///   environment
///
/// # Errors
/// Returns an error if a numeric environment variable is malformed.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();
    let defaults = ClientConfig::default();

    // Helper macro to get a value with priority: ENV > YAML > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            env::var($env_var)
                .ok()
                .or_else(|| $yaml_value)
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional values: ENV > YAML
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            env::var($env_var).ok().or_else(|| $yaml_value)
        };
    }

    // Dashboard endpoints
    let base_url = get_value!(
        "CRIER_BASE_URL",
        yaml.dashboard.as_ref().and_then(|d| d.base_url.clone()),
        defaults.base_url
    );

    let ws_url = get_optional!(
        "CRIER_WS_URL",
        yaml.dashboard.as_ref().and_then(|d| d.ws_url.clone())
    );

    let auth_token = get_optional!(
        "CRIER_AUTH_TOKEN",
        yaml.dashboard.as_ref().and_then(|d| d.auth_token.clone())
    );

    // Cache configuration
    let cache_dir = get_optional!(
        "CRIER_CACHE_DIR",
        yaml.cache.as_ref().and_then(|c| c.dir.clone())
    )
    .map(PathBuf::from);

    let audio_yaml = yaml.cache.as_ref().and_then(|c| c.audio.as_ref());
    let audio_cache = CacheBounds {
        max_bytes: env_u64("CRIER_AUDIO_CACHE_MAX_BYTES")?
            .or_else(|| audio_yaml.and_then(|b| b.max_bytes))
            .unwrap_or(defaults.audio_cache.max_bytes),
        max_age_ms: env_u64("CRIER_AUDIO_CACHE_MAX_AGE_MS")?
            .or_else(|| audio_yaml.and_then(|b| b.max_age_ms))
            .unwrap_or(defaults.audio_cache.max_age_ms),
        max_entries: env_u64("CRIER_AUDIO_CACHE_MAX_ENTRIES")?
            .map(|v| v as usize)
            .or_else(|| audio_yaml.and_then(|b| b.max_entries))
            .or(defaults.audio_cache.max_entries),
    };

    let message_yaml = yaml.cache.as_ref().and_then(|c| c.messages.as_ref());
    let message_cache = CacheBounds {
        max_bytes: env_u64("CRIER_MESSAGE_CACHE_MAX_BYTES")?
            .or_else(|| message_yaml.and_then(|b| b.max_bytes))
            .unwrap_or(defaults.message_cache.max_bytes),
        max_age_ms: env_u64("CRIER_MESSAGE_CACHE_MAX_AGE_MS")?
            .or_else(|| message_yaml.and_then(|b| b.max_age_ms))
            .unwrap_or(defaults.message_cache.max_age_ms),
        max_entries: env_u64("CRIER_MESSAGE_CACHE_MAX_ENTRIES")?
            .map(|v| v as usize)
            .or_else(|| message_yaml.and_then(|b| b.max_entries))
            .or(defaults.message_cache.max_entries),
    };

    // Speech session timing
    let request_timeout_seconds = env_u64("CRIER_REQUEST_TIMEOUT_SECONDS")?
        .or_else(|| yaml.speech.as_ref().and_then(|s| s.request_timeout_seconds))
        .unwrap_or(defaults.request_timeout_seconds);

    let first_fragment_seconds = env_u64("CRIER_FIRST_FRAGMENT_SECONDS")?
        .or_else(|| yaml.speech.as_ref().and_then(|s| s.first_fragment_seconds))
        .unwrap_or(defaults.first_fragment_seconds);

    // Playback
    let inter_clip_pause_ms = env_u64("CRIER_INTER_CLIP_PAUSE_MS")?
        .or_else(|| yaml.playback.as_ref().and_then(|p| p.inter_clip_pause_ms))
        .unwrap_or(defaults.inter_clip_pause_ms);

    let quiet = env::var("CRIER_QUIET")
        .ok()
        .and_then(|v| parse_bool(&v))
        .or_else(|| yaml.playback.as_ref().and_then(|p| p.quiet))
        .unwrap_or(defaults.quiet);

    // Notification sound table
    let sounds_yaml = yaml.sounds.as_ref();
    let sounds = SoundTable {
        low_priority: get_value!(
            "CRIER_SOUND_LOW",
            sounds_yaml.and_then(|s| s.low_priority.clone()),
            defaults.sounds.low_priority
        ),
        high_priority: get_value!(
            "CRIER_SOUND_HIGH",
            sounds_yaml.and_then(|s| s.high_priority.clone()),
            defaults.sounds.high_priority
        ),
        error: get_value!(
            "CRIER_SOUND_ERROR",
            sounds_yaml.and_then(|s| s.error.clone()),
            defaults.sounds.error
        ),
        chime: get_value!(
            "CRIER_SOUND_CHIME",
            sounds_yaml.and_then(|s| s.chime.clone()),
            defaults.sounds.chime
        ),
    };

    Ok(ClientConfig {
        base_url,
        ws_url,
        auth_token,
        cache_dir,
        audio_cache,
        message_cache,
        request_timeout_seconds,
        first_fragment_seconds,
        inter_clip_pause_ms,
        quiet,
        sounds,
    })
}
