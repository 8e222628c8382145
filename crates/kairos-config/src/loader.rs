//! Layered dotenv loader.
//!
//! Sources, lowest precedence first:
//! 1. `<dir>/.env`
//! 2. `<dir>/.<APP_ENV>.env`, or `<dir>/.local.env` when `APP_ENV` is unset
//! 3. the process environment
//!
//! Missing files are skipped. A file that exists but cannot be parsed is an
//! error.

use std::path::{Path, PathBuf};

use crate::config::MapConfig;
use crate::error::ConfigError;

/// Environment variable naming the deployment environment.
pub const APP_ENV: &str = "APP_ENV";

/// Builder that produces a [`MapConfig`] from dotenv files and the process
/// environment.
///
/// ```no_run
/// use kairos_config::{Config, ConfigLoader};
///
/// # fn main() -> Result<(), kairos_config::ConfigError> {
/// let config = ConfigLoader::new("./configs").load()?;
/// let port = config.get_or_default("HTTP_PORT", "8000");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    app_env: Option<String>,
    process_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new("./configs")
    }
}

impl ConfigLoader {
    /// Loads files from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            app_env: None,
            process_env: true,
        }
    }

    /// Forces the environment name instead of reading `APP_ENV`.
    #[must_use]
    pub fn app_env(mut self, name: impl Into<String>) -> Self {
        self.app_env = Some(name.into());
        self
    }

    /// Whether the process environment overrides file values (default `true`).
    #[must_use]
    pub fn process_env(mut self, enabled: bool) -> Self {
        self.process_env = enabled;
        self
    }

    /// Reads every layer and merges them.
    pub fn load(&self) -> Result<MapConfig, ConfigError> {
        let mut config = MapConfig::new();

        let base = self.dir.join(".env");
        let base_loaded = merge_file(&mut config, &base)?;

        let env_name = self
            .app_env
            .clone()
            .or_else(|| self.process_var(APP_ENV))
            .or_else(|| crate::Config::get(&config, APP_ENV))
            .filter(|name| !name.trim().is_empty());

        let env_file = match env_name.as_deref() {
            Some(name) => self.dir.join(format!(".{}.env", name.trim())),
            None => self.dir.join(".local.env"),
        };
        let env_loaded = merge_file(&mut config, &env_file)?;

        if self.process_env {
            config.extend(std::env::vars_os().filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            }));
        }

        tracing::debug!(
            dir = %self.dir.display(),
            env = env_name.as_deref().unwrap_or("local"),
            base_loaded,
            env_loaded,
            "configuration loaded"
        );
        Ok(config)
    }

    fn process_var(&self, key: &str) -> Option<String> {
        if self.process_env {
            std::env::var(key).ok()
        } else {
            None
        }
    }
}

fn merge_file(config: &mut MapConfig, path: &Path) -> Result<bool, ConfigError> {
    if !path.is_file() {
        return Ok(false);
    }

    let to_error = |source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    };
    for item in dotenvy::from_path_iter(path).map_err(to_error)? {
        let (key, value) = item.map_err(to_error)?;
        config.set(key, value);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let config = ConfigLoader::new("/nonexistent/kairos")
            .process_env(false)
            .load()
            .unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_env_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "HTTP_PORT=8000\nAPP_NAME=orders\n");
        write(dir.path(), ".test.env", "HTTP_PORT=9100\n");

        let config = ConfigLoader::new(dir.path())
            .app_env("test")
            .process_env(false)
            .load()
            .unwrap();

        assert_eq!(config.get("HTTP_PORT").as_deref(), Some("9100"));
        assert_eq!(config.get("APP_NAME").as_deref(), Some("orders"));
    }

    #[test]
    fn test_local_env_used_without_app_env() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "LOG_LEVEL=info\n");
        write(dir.path(), ".local.env", "LOG_LEVEL=debug\n");

        let config = ConfigLoader::new(dir.path())
            .process_env(false)
            .load()
            .unwrap();
        assert_eq!(config.get("LOG_LEVEL").as_deref(), Some("debug"));
    }

    #[test]
    fn test_app_env_from_base_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "APP_ENV=staging\nGRPC_PORT=9000\n");
        write(dir.path(), ".staging.env", "GRPC_PORT=9500\n");

        let config = ConfigLoader::new(dir.path())
            .process_env(false)
            .load()
            .unwrap();
        assert_eq!(config.get("GRPC_PORT").as_deref(), Some("9500"));
    }

    #[test]
    fn test_unparsable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "THIS IS NOT=\"closed\n");

        let err = ConfigLoader::new(dir.path())
            .process_env(false)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}
