// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	ClusterConfigLayer, InventoryConfigLayer, LoggingConfigLayer, OrchestrationConfigLayer,
	RuntimeConfigLayer, SshConfigLayer, VerifyConfigLayer,
};

/// Deployer configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KforgeConfigLayer {
	#[serde(default)]
	pub ssh: Option<SshConfigLayer>,
	#[serde(default)]
	pub cluster: Option<ClusterConfigLayer>,
	#[serde(default)]
	pub runtime: Option<RuntimeConfigLayer>,
	#[serde(default)]
	pub orchestration: Option<OrchestrationConfigLayer>,
	#[serde(default)]
	pub verify: Option<VerifyConfigLayer>,
	#[serde(default)]
	pub inventory: Option<InventoryConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl KforgeConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: KforgeConfigLayer) {
		merge_option(&mut self.ssh, other.ssh, SshConfigLayer::merge);
		merge_option(&mut self.cluster, other.cluster, ClusterConfigLayer::merge);
		merge_option(&mut self.runtime, other.runtime, RuntimeConfigLayer::merge);
		merge_option(
			&mut self.orchestration,
			other.orchestration,
			OrchestrationConfigLayer::merge,
		);
		merge_option(&mut self.verify, other.verify, VerifyConfigLayer::merge);
		merge_option(
			&mut self.inventory,
			other.inventory,
			InventoryConfigLayer::merge,
		);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
