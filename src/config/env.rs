use super::ClientConfig;
use super::{merge, validation};

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `CRIER_*` variables with built-in defaults for everything
    /// left unset. Loads a `.env` file first if one is present.
    ///
    /// Recognized variables:
    /// - `CRIER_BASE_URL`, `CRIER_WS_URL`, `CRIER_AUTH_TOKEN`
    /// - `CRIER_CACHE_DIR`
    /// - `CRIER_AUDIO_CACHE_MAX_BYTES`, `CRIER_AUDIO_CACHE_MAX_AGE_MS`,
    ///   `CRIER_AUDIO_CACHE_MAX_ENTRIES` (and the `MESSAGE_CACHE`
    ///   equivalents)
    /// - `CRIER_REQUEST_TIMEOUT_SECONDS`, `CRIER_FIRST_FRAGMENT_SECONDS`
    /// - `CRIER_INTER_CLIP_PAUSE_MS`, `CRIER_QUIET`
    /// - `CRIER_SOUND_LOW`, `CRIER_SOUND_HIGH`, `CRIER_SOUND_ERROR`,
    ///   `CRIER_SOUND_CHIME`
    ///
    /// # Errors
    /// Returns an error if a numeric variable is malformed or the final
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = merge::merge_config(None)?;
        validation::validate_config(&config)?;
        Ok(config)
    }
}
