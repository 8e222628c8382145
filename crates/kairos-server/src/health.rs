//! Health and heartbeat payloads.
//!
//! ```rust
//! use kairos_server::HealthCheck;
//!
//! let health = HealthCheck::new("orders", "1.4.0");
//! let status = health.status();
//! assert!(status.is_up());
//! assert_eq!(status.name(), "orders");
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Status reported while the server is serving.
pub const STATUS_UP: &str = "UP";

/// Body of `/.well-known/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    status: String,
    name: String,
    version: String,
    uptime_seconds: u64,
}

impl HealthStatus {
    /// Creates a status that reports `UP`.
    #[must_use]
    pub fn up(name: impl Into<String>, version: impl Into<String>, uptime: Duration) -> Self {
        Self {
            status: STATUS_UP.to_string(),
            name: name.into(),
            version: version.into(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Seconds since the server was built.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    /// Returns `true` when the status is `UP`.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status == STATUS_UP
    }
}

/// Body of `/.well-known/alive`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    status: String,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            status: STATUS_UP.to_string(),
        }
    }
}

/// Produces [`HealthStatus`] values for one server instance.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: String,
    version: String,
    start_time: Instant,
}

impl HealthCheck {
    /// Starts the uptime clock.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            start_time: Instant::now(),
        }
    }

    /// Current status. A running server is always `UP`.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus::up(&self.name, &self.version, self.uptime())
    }

    /// Time since construction.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
