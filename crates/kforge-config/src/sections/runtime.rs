// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Container runtime daemon settings.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfigLayer {
	pub cgroup_driver: Option<String>,
	pub storage_driver: Option<String>,
	pub log_max_size: Option<String>,
	pub log_max_file: Option<u32>,
}

impl RuntimeConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.cgroup_driver.is_some() {
			self.cgroup_driver = other.cgroup_driver;
		}
		if other.storage_driver.is_some() {
			self.storage_driver = other.storage_driver;
		}
		if other.log_max_size.is_some() {
			self.log_max_size = other.log_max_size;
		}
		if other.log_max_file.is_some() {
			self.log_max_file = other.log_max_file;
		}
	}

	pub fn finalize(self) -> RuntimeConfig {
		let defaults = RuntimeConfig::default();
		RuntimeConfig {
			cgroup_driver: self.cgroup_driver.unwrap_or(defaults.cgroup_driver),
			storage_driver: self.storage_driver.unwrap_or(defaults.storage_driver),
			log_max_size: self.log_max_size.unwrap_or(defaults.log_max_size),
			log_max_file: self.log_max_file.unwrap_or(defaults.log_max_file),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
	pub cgroup_driver: String,
	pub storage_driver: String,
	pub log_max_size: String,
	pub log_max_file: u32,
}

impl RuntimeConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		match self.cgroup_driver.as_str() {
			"systemd" | "cgroupfs" => {}
			other => {
				return Err(ConfigError::invalid_value(
					"runtime.cgroup_driver",
					format!("unknown cgroup driver '{other}'"),
				))
			}
		}
		if self.log_max_file == 0 {
			return Err(ConfigError::invalid_value(
				"runtime.log_max_file",
				"must keep at least one log file",
			));
		}
		Ok(())
	}
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			cgroup_driver: "systemd".to_string(),
			storage_driver: "overlay2".to_string(),
			log_max_size: "100m".to_string(),
			log_max_file: 3,
		}
	}
}
