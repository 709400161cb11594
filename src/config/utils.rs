use std::env;

/// Parse a boolean value from a string, supporting multiple formats
///
/// Accepts: "true", "false", "1", "0", "yes", "no" (case insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Read and parse a numeric environment variable
///
/// Unset variables are `Ok(None)`; a set but malformed value is an
/// error naming the variable.
pub fn env_u64(name: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<u64>()
                .map_err(|e| format!("Invalid {name}: {e}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool_true_variants() {
        for value in ["true", "TRUE", "True", "1", "yes", "YES"] {
            assert_eq!(parse_bool(value), Some(true), "{value}");
        }
    }

    #[test]
    fn test_parse_bool_false_variants() {
        for value in ["false", "FALSE", "False", "0", "no", "NO"] {
            assert_eq!(parse_bool(value), Some(false), "{value}");
        }
    }

    #[test]
    fn test_parse_bool_invalid() {
        assert_eq!(parse_bool("invalid"), None);
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_env_u64_unset() {
        unsafe {
            env::remove_var("CRIER_TEST_ENV_U64");
        }
        assert_eq!(env_u64("CRIER_TEST_ENV_U64").unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_env_u64_valid() {
        unsafe {
            env::set_var("CRIER_TEST_ENV_U64", "1234");
        }
        assert_eq!(env_u64("CRIER_TEST_ENV_U64").unwrap(), Some(1234));
        unsafe {
            env::remove_var("CRIER_TEST_ENV_U64");
        }
    }

    #[test]
    #[serial]
    fn test_env_u64_malformed() {
        unsafe {
            env::set_var("CRIER_TEST_ENV_U64", "12 days");
        }
        let result = env_u64("CRIER_TEST_ENV_U64");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("CRIER_TEST_ENV_U64")
        );
        unsafe {
            env::remove_var("CRIER_TEST_ENV_U64");
        }
    }
}
