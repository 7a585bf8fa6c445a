// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inventory section: where node addresses come from when the CLI does not
//! name them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InventoryConfigLayer {
	pub control_plane: Option<String>,
	pub workers: Option<Vec<String>>,
	pub terraform_output: Option<PathBuf>,
	pub terraform_control_plane_key: Option<String>,
	pub terraform_workers_key: Option<String>,
}

impl InventoryConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.control_plane.is_some() {
			self.control_plane = other.control_plane;
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.terraform_output.is_some() {
			self.terraform_output = other.terraform_output;
		}
		if other.terraform_control_plane_key.is_some() {
			self.terraform_control_plane_key = other.terraform_control_plane_key;
		}
		if other.terraform_workers_key.is_some() {
			self.terraform_workers_key = other.terraform_workers_key;
		}
	}

	pub fn finalize(self) -> InventoryConfig {
		let defaults = InventoryConfig::default();
		InventoryConfig {
			control_plane: self.control_plane,
			workers: self.workers.unwrap_or_default(),
			terraform_output: self.terraform_output,
			terraform_control_plane_key: self
				.terraform_control_plane_key
				.unwrap_or(defaults.terraform_control_plane_key),
			terraform_workers_key: self
				.terraform_workers_key
				.unwrap_or(defaults.terraform_workers_key),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryConfig {
	pub control_plane: Option<String>,
	pub workers: Vec<String>,
	/// Path to a `terraform output -json` document.
	pub terraform_output: Option<PathBuf>,
	pub terraform_control_plane_key: String,
	pub terraform_workers_key: String,
}

impl Default for InventoryConfig {
	fn default() -> Self {
		Self {
			control_plane: None,
			workers: Vec::new(),
			terraform_output: None,
			terraform_control_plane_key: "control_plane_ip".to_string(),
			terraform_workers_key: "worker_ips".to_string(),
		}
	}
}
