//! Environment-variable helpers shared by the configuration structs of the
//! store and messaging crates.

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// A required environment variable is missing or has an invalid value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The variable is not set.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// The variable is set but cannot be parsed.
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Reads a required variable.
///
/// # Errors
///
/// Returns `ConfigError::Missing` if `key` is unset or not unicode.
pub fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

/// Reads and parses `key`, falling back to `default` when unset.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if the variable is set but does not parse.
pub fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Parses a raw value read from `key`.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` carrying the parser message.
pub fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let value: u16 = parse("PORT", " 8080 ").unwrap();
        assert_eq!(value, 8080);
    }

    #[test]
    fn test_parse_rejects_zero_for_non_zero_types() {
        let err = parse::<NonZeroU64>("STRATA_SNAPSHOT_FREQUENCY", "0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "STRATA_SNAPSHOT_FREQUENCY", .. }
        ));
    }
}
