// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Orchestration and verification settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationConfigLayer {
	pub max_parallel: Option<usize>,
	pub network_plugin_grace_secs: Option<u64>,
	pub allow_partial_inventory: Option<bool>,
	pub probe_timeout_secs: Option<u64>,
}

impl OrchestrationConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_parallel.is_some() {
			self.max_parallel = other.max_parallel;
		}
		if other.network_plugin_grace_secs.is_some() {
			self.network_plugin_grace_secs = other.network_plugin_grace_secs;
		}
		if other.allow_partial_inventory.is_some() {
			self.allow_partial_inventory = other.allow_partial_inventory;
		}
		if other.probe_timeout_secs.is_some() {
			self.probe_timeout_secs = other.probe_timeout_secs;
		}
	}

	pub fn finalize(self) -> OrchestrationConfig {
		let defaults = OrchestrationConfig::default();
		OrchestrationConfig {
			max_parallel: self.max_parallel.unwrap_or(defaults.max_parallel),
			network_plugin_grace_secs: self
				.network_plugin_grace_secs
				.unwrap_or(defaults.network_plugin_grace_secs),
			allow_partial_inventory: self
				.allow_partial_inventory
				.unwrap_or(defaults.allow_partial_inventory),
			probe_timeout_secs: self
				.probe_timeout_secs
				.unwrap_or(defaults.probe_timeout_secs),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationConfig {
	/// Upper bound on concurrent remote sessions.
	pub max_parallel: usize,
	pub network_plugin_grace_secs: u64,
	/// Continue with reachable workers when some fail the liveness probe.
	pub allow_partial_inventory: bool,
	pub probe_timeout_secs: u64,
}

impl OrchestrationConfig {
	pub fn network_plugin_grace(&self) -> Duration {
		Duration::from_secs(self.network_plugin_grace_secs)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_secs(self.probe_timeout_secs)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_parallel == 0 {
			return Err(ConfigError::invalid_value(
				"orchestration.max_parallel",
				"must be at least 1",
			));
		}
		if self.probe_timeout_secs == 0 {
			return Err(ConfigError::invalid_value(
				"orchestration.probe_timeout_secs",
				"must be non-zero",
			));
		}
		Ok(())
	}
}

impl Default for OrchestrationConfig {
	fn default() -> Self {
		Self {
			max_parallel: 4,
			network_plugin_grace_secs: 30,
			allow_partial_inventory: false,
			probe_timeout_secs: 5,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfigLayer {
	pub poll_interval_secs: Option<u64>,
	pub timeout_secs: Option<u64>,
}

impl VerifyConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
	}

	pub fn finalize(self) -> VerifyConfig {
		let defaults = VerifyConfig::default();
		VerifyConfig {
			poll_interval_secs: self
				.poll_interval_secs
				.unwrap_or(defaults.poll_interval_secs),
			timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfig {
	pub poll_interval_secs: u64,
	pub timeout_secs: u64,
}

impl VerifyConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.poll_interval_secs == 0 {
			return Err(ConfigError::invalid_value(
				"verify.poll_interval_secs",
				"must be non-zero",
			));
		}
		if self.poll_interval_secs > self.timeout_secs {
			return Err(ConfigError::Validation(format!(
				"verify.poll_interval_secs ({}) exceeds verify.timeout_secs ({})",
				self.poll_interval_secs, self.timeout_secs
			)));
		}
		Ok(())
	}
}

impl Default for VerifyConfig {
	fn default() -> Self {
		Self {
			poll_interval_secs: 5,
			timeout_secs: 180, // 3 minutes
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_orchestration_defaults() {
		let config = OrchestrationConfigLayer::default().finalize();
		assert_eq!(config.max_parallel, 4);
		assert_eq!(config.network_plugin_grace(), Duration::from_secs(30));
		assert!(!config.allow_partial_inventory);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_zero_parallelism_rejected() {
		let config = OrchestrationConfig {
			max_parallel: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_verify_defaults() {
		let config = VerifyConfig::default();
		assert_eq!(config.poll_interval(), Duration::from_secs(5));
		assert_eq!(config.timeout(), Duration::from_secs(180));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_poll_interval_longer_than_timeout_rejected() {
		let config = VerifyConfig {
			poll_interval_secs: 60,
			timeout_secs: 30,
		};
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("exceeds"));
	}

	#[test]
	fn test_verify_merge() {
		let mut base = VerifyConfigLayer {
			poll_interval_secs: Some(5),
			timeout_secs: Some(180),
		};
		base.merge(VerifyConfigLayer {
			poll_interval_secs: None,
			timeout_secs: Some(600),
		});
		assert_eq!(base.poll_interval_secs, Some(5));
		assert_eq!(base.timeout_secs, Some(600));
	}
}
