//! Thin secret lookup at the environment boundary.
//!
//! Production deployments inject secrets into the environment before the
//! gateway starts; cloud secret managers are outside this repository.

use tracing::warn;

/// Reads a secret from the environment. Missing or blank values are logged
/// and reported as absent so callers can decide whether that is fatal.
pub fn get_secret(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => {
            warn!(secret = name, "requested secret is not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_secret_is_absent() {
        std::env::set_var("PARLANCE_TEST_SECRET_BLANK", "   ");
        assert!(get_secret("PARLANCE_TEST_SECRET_BLANK").is_none());
        std::env::set_var("PARLANCE_TEST_SECRET_SET", "value");
        assert_eq!(
            get_secret("PARLANCE_TEST_SECRET_SET").as_deref(),
            Some("value")
        );
    }
}
