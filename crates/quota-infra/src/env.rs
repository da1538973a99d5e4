//! Environment variable helpers shared by the `from_env` constructors.

use std::str::FromStr;

use quota_core::ConfigError;

/// Read `key`, falling back to `default` when unset.
///
/// A value that is set but does not parse is a configuration error rather than
/// a silent fallback.
pub fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{:?}: {}", raw, e))),
        None => Ok(default),
    }
}

/// Read `key`, treating empty strings as unset.
pub fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

/// Accepts `true/false`, `1/0`, `yes/no`.
pub fn flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(ConfigError::invalid(key, format!("{:?} is not a boolean", v))),
    }
}
