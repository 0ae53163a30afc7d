//! Prompt configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [authenticator]
//! transition_capacity = 64
//!
//! [authenticator.health_card]
//! pin_min_length = 6
//! pin_max_length = 8
//! ```

use serde::{Deserialize, Serialize};

/// Smallest PIN length a health card accepts.
const PIN_LENGTH_FLOOR: usize = 4;

/// Largest PIN length a health card accepts.
const PIN_LENGTH_CEILING: usize = 12;

/// Root configuration for the authentication prompts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// Buffer size of the per-prompt state transition broadcast.
    /// Slow subscribers lose the oldest transitions beyond this limit.
    pub transition_capacity: usize,

    /// Health card prompt settings.
    pub health_card: HealthCardConfig,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            transition_capacity: 64,
            health_card: HealthCardConfig::default(),
        }
    }
}

/// Health card prompt settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCardConfig {
    /// Minimum number of PIN digits.
    pub pin_min_length: usize,

    /// Maximum number of PIN digits.
    pub pin_max_length: usize,
}

impl Default for HealthCardConfig {
    fn default() -> Self {
        Self {
            pin_min_length: 6,
            pin_max_length: 8,
        }
    }
}

impl HealthCardConfig {
    /// Regular expression that accepts exactly the configured PIN shape.
    #[must_use]
    pub fn pin_pattern(&self) -> String {
        format!(r"^\d{{{},{}}}$", self.pin_min_length, self.pin_max_length)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl AuthenticatorConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `transition_capacity` is zero
    /// - the PIN length bounds are outside 4..=12 or inverted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transition_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "transition_capacity must be > 0".to_string(),
            ));
        }

        let hc = &self.health_card;
        if hc.pin_min_length < PIN_LENGTH_FLOOR || hc.pin_max_length > PIN_LENGTH_CEILING {
            return Err(ConfigError::InvalidValue(format!(
                "PIN length must be within {PIN_LENGTH_FLOOR}..={PIN_LENGTH_CEILING}, got {}..={}",
                hc.pin_min_length, hc.pin_max_length
            )));
        }
        if hc.pin_min_length > hc.pin_max_length {
            return Err(ConfigError::InvalidValue(format!(
                "pin_min_length ({}) exceeds pin_max_length ({})",
                hc.pin_min_length, hc.pin_max_length
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuthenticatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transition_capacity, 64);
        assert_eq!(config.health_card.pin_min_length, 6);
        assert_eq!(config.health_card.pin_max_length, 8);
    }

    #[test]
    fn test_zero_capacity_fails_validation() {
        let config = AuthenticatorConfig {
            transition_capacity: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("transition_capacity"));
    }

    #[test]
    fn test_inverted_pin_bounds_fail_validation() {
        let mut config = AuthenticatorConfig::default();
        config.health_card.pin_min_length = 8;
        config.health_card.pin_max_length = 6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_out_of_range_pin_bounds_fail_validation() {
        let mut config = AuthenticatorConfig::default();
        config.health_card.pin_min_length = 2;
        assert!(config.validate().is_err());

        let mut config = AuthenticatorConfig::default();
        config.health_card.pin_max_length = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pin_pattern() {
        assert_eq!(HealthCardConfig::default().pin_pattern(), r"^\d{6,8}$");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AuthenticatorConfig = toml::from_str(
            r#"
            [health_card]
            pin_max_length = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.transition_capacity, 64);
        assert_eq!(config.health_card.pin_min_length, 6);
        assert_eq!(config.health_card.pin_max_length, 10);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = AuthenticatorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AuthenticatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue("test error".to_string());
        assert_eq!(err.to_string(), "Invalid configuration value: test error");
    }
}
