//! Configuration for Kairos services.
//!
//! Configuration is a flat set of string keys (`HTTP_PORT`, `CERT_FILE`,
//! `SHUTDOWN_GRACE_PERIOD`, ...). [`ConfigLoader`] builds it from dotenv
//! files and the process environment; [`MapConfig`] holds it in memory;
//! [`ConfigExt`] adds typed reads on top of any [`Config`].
//!
//! ```
//! use std::time::Duration;
//! use kairos_config::{ConfigExt, MapConfig};
//!
//! let config = MapConfig::new().with("SHUTDOWN_GRACE_PERIOD", "10s");
//! let grace = config
//!     .get_duration("SHUTDOWN_GRACE_PERIOD", Duration::from_secs(30))
//!     .unwrap();
//! assert_eq!(grace, Duration::from_secs(10));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

pub use config::{parse_duration, Config, ConfigExt, MapConfig};
pub use error::ConfigError;
pub use loader::{ConfigLoader, APP_ENV};
