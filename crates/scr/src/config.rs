//! Runtime configuration.
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! keep_instances = false
//! lock_timeout_ms = 5000
//! stop_timeout_ms = 60000
//! log_level = "info"
//! actor_thread_name = "component-actor"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Runtime configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse runtime configuration: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid value for {key}: {reason}")]
	Invalid { key: &'static str, reason: String },
}

/// Knobs for [`ServiceComponentRuntime`](crate::ServiceComponentRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrConfig {
	/// Keep delayed component instances alive after their last consumer releases them.
	pub keep_instances: bool,
	/// Upper bound on waiting for another component's activation when obtaining its service.
	pub lock_timeout_ms: u64,
	/// Upper bound on draining component actors during settle and shutdown.
	pub stop_timeout_ms: u64,
	/// Default log filter for the `keel` binary.
	pub log_level: String,
	/// Thread name of the shared pool draining component actors.
	pub actor_thread_name: String,
}

impl Default for ScrConfig {
	fn default() -> Self {
		Self {
			keep_instances: false,
			lock_timeout_ms: 5_000,
			stop_timeout_ms: 60_000,
			log_level: "info".to_string(),
			actor_thread_name: "component-actor".to_string(),
		}
	}
}

impl ScrConfig {
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&input)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.lock_timeout_ms == 0 {
			return Err(ConfigError::Invalid {
				key: "lock_timeout_ms",
				reason: "must be greater than zero".to_string(),
			});
		}
		if self.stop_timeout_ms == 0 {
			return Err(ConfigError::Invalid {
				key: "stop_timeout_ms",
				reason: "must be greater than zero".to_string(),
			});
		}
		if !LOG_LEVELS.contains(&self.log_level.as_str()) {
			return Err(ConfigError::Invalid {
				key: "log_level",
				reason: format!("expected one of {}", LOG_LEVELS.join(", ")),
			});
		}
		if self.actor_thread_name.trim().is_empty() {
			return Err(ConfigError::Invalid {
				key: "actor_thread_name",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}

	pub fn lock_timeout(&self) -> Duration {
		Duration::from_millis(self.lock_timeout_ms)
	}

	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}
}
