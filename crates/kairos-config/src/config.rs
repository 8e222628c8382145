//! The configuration collaborator.
//!
//! [`Config`] is a flat string key/value source. Typed reads go through
//! [`ConfigExt`], which every `Config` gets for free.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Flat key/value configuration source.
pub trait Config: Send + Sync {
    /// Raw value for `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Value for `key`, or `default` when missing or blank.
    fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

impl<C: Config + ?Sized> Config for &C {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

impl<C: Config + ?Sized> Config for std::sync::Arc<C> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Typed accessors layered over [`Config`].
pub trait ConfigExt: Config {
    /// Parses `key` with [`FromStr`]; `Ok(None)` when missing or blank.
    fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::invalid_value(key, raw.as_str(), e.to_string())),
            _ => Ok(None),
        }
    }

    /// Parses `key`, falling back to `default`.
    fn get_parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Reads a boolean (`true/false`, `1/0`, `yes/no`, `on/off`).
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key).filter(|v| !v.trim().is_empty()) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid_value(key, raw, "expected a boolean")),
        }
    }

    /// Reads a duration; see [`parse_duration`] for the accepted forms.
    fn get_duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_duration(&raw)
                .ok_or_else(|| ConfigError::invalid_value(key, raw, "expected a duration such as 30s")),
            None => Ok(default),
        }
    }

    /// Reads a comma-separated list. Items are trimmed and empties dropped.
    fn get_list(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.get(key) {
            Some(raw) => split_list(&raw),
            None => default.iter().map(ToString::to_string).collect(),
        }
    }
}

impl<C: Config + ?Sized> ConfigExt for C {}

/// Parses `30` (seconds), `30s`, `500ms`, `2m` or `1h`.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// In-memory configuration.
///
/// ```
/// use kairos_config::{Config, ConfigExt, MapConfig};
///
/// let config = MapConfig::new().with("HTTP_PORT", "8080");
/// assert_eq!(config.get_parsed_or("HTTP_PORT", 8000_u16).unwrap(), 8080);
/// assert_eq!(config.get_or_default("APP_NAME", "kairos"), "kairos");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Config for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Extend<(String, String)> for MapConfig {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_default_blank_is_missing() {
        let config = MapConfig::new().with("APP_NAME", "  ");
        assert_eq!(config.get_or_default("APP_NAME", "kairos"), "kairos");
        assert_eq!(config.get("APP_NAME").as_deref(), Some("  "));
    }

    #[test]
    fn test_get_parsed() {
        let config = MapConfig::new()
            .with("HTTP_PORT", " 8080 ")
            .with("BAD_PORT", "eighty");

        assert_eq!(config.get_parsed::<u16>("HTTP_PORT").unwrap(), Some(8080));
        assert_eq!(config.get_parsed::<u16>("MISSING").unwrap(), None);
        let err = config.get_parsed::<u16>("BAD_PORT").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BAD_PORT"));
    }

    #[test]
    fn test_get_bool() {
        let config = MapConfig::new()
            .with("A", "TRUE")
            .with("B", "0")
            .with("C", "maybe");

        assert!(config.get_bool("A", false).unwrap());
        assert!(!config.get_bool("B", true).unwrap());
        assert!(config.get_bool("MISSING", true).unwrap());
        assert!(config.get_bool("C", false).is_err());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("ten"), None);
        assert_eq!(parse_duration("5d"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_get_duration() {
        let config = MapConfig::new()
            .with("SHUTDOWN_GRACE_PERIOD", "10s")
            .with("BROKEN", "soon");

        assert_eq!(
            config
                .get_duration("SHUTDOWN_GRACE_PERIOD", Duration::from_secs(30))
                .unwrap(),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.get_duration("MISSING", Duration::from_secs(30)).unwrap(),
            Duration::from_secs(30)
        );
        assert!(config.get_duration("BROKEN", Duration::ZERO).is_err());
    }

    #[test]
    fn test_get_list() {
        let config = MapConfig::new().with("LOG_OMIT_HEADERS", "Authorization, ,Cookie ,");
        assert_eq!(
            config.get_list("LOG_OMIT_HEADERS", &[]),
            vec!["Authorization".to_string(), "Cookie".to_string()]
        );
        assert_eq!(config.get_list("MISSING", &["a", "b"]), vec!["a", "b"]);
    }

    #[test]
    fn test_config_through_reference_and_arc() {
        let config = MapConfig::from_iter([("K", "v")]);
        let by_ref: &dyn Config = &config;
        assert_eq!(by_ref.get_or_default("K", "x"), "v");

        let shared = std::sync::Arc::new(config);
        assert_eq!(shared.get("K").as_deref(), Some("v"));
    }
}
