use super::ClientConfig;
use crate::core::cache::CacheBounds;

/// Validate a merged configuration
///
/// Checks URL schemes, cache bounds, and speech timing. Called after
/// every load path so a bad value fails at startup rather than at first
/// use.
pub fn validate_config(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_urls(&config.base_url, &config.ws_url)?;
    validate_bounds("audio cache", &config.audio_cache)?;
    validate_bounds("message cache", &config.message_cache)?;
    validate_timing(
        config.request_timeout_seconds,
        config.first_fragment_seconds,
    )?;
    Ok(())
}

/// Validate dashboard endpoint URLs
///
/// The base URL must be HTTP(S); the WebSocket root, when given, must
/// be WS(S).
pub fn validate_urls(
    base_url: &str,
    ws_url: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(format!("Dashboard base URL must be http(s)://, got: {base_url}").into());
    }

    if let Some(ws) = ws_url
        && !ws.starts_with("ws://")
        && !ws.starts_with("wss://")
    {
        return Err(format!("Dashboard WebSocket URL must be ws(s)://, got: {ws}").into());
    }

    Ok(())
}

/// Validate the bounds of one cache instance
pub fn validate_bounds(
    instance: &str,
    bounds: &CacheBounds,
) -> Result<(), Box<dyn std::error::Error>> {
    bounds
        .validate()
        .map_err(|e| format!("Invalid {instance} bounds: {e}").into())
}

/// Validate speech session timing
///
/// Both windows must be non-zero; a zero window would fail every
/// request instantly.
pub fn validate_timing(
    request_timeout_seconds: u64,
    first_fragment_seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if request_timeout_seconds == 0 {
        return Err("Speech request timeout must be > 0 seconds".into());
    }
    if first_fragment_seconds == 0 {
        return Err("First-fragment window must be > 0 seconds".into());
    }
    Ok(())
}
