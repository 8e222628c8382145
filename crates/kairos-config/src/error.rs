//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or reading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment file exists but could not be read or parsed.
    #[error("failed to load environment file {path}: {source}")]
    File {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying dotenv error.
        #[source]
        source: dotenvy::Error,
    },

    /// A value is present but cannot be interpreted.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an [`ConfigError::InvalidValue`].
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::invalid_value("HTTP_PORT", "eighty", "expected an integer");
        let text = err.to_string();
        assert!(text.contains("HTTP_PORT"));
        assert!(text.contains("\"eighty\""));
        assert!(text.contains("expected an integer"));
    }
}
