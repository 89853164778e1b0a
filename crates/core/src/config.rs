//! Helpers for reading typed settings from environment variables.
//!
//! Unset variables fall back to a default; set-but-unparseable values are
//! reported as [`CoreError::Validation`] naming the variable.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `name`, parsing it as `T`, or return `default` when unset or blank.
pub fn env_or<T>(name: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// Read an optional setting. Blank values count as unset.
pub fn env_opt<T>(name: &str) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| CoreError::Validation(format!("{name} is invalid ({raw:?}): {e}")))
}

/// Read a required string setting.
pub fn env_required(name: &str) -> Result<String, CoreError> {
    env_string(name).ok_or_else(|| CoreError::Validation(format!("{name} must be set")))
}

/// Read a trimmed, non-empty string setting.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
