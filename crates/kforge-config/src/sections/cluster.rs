// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster configuration section: Kubernetes version, pod network and join
//! credential lifecycle.

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_network_plugin_manifest() -> String {
	"https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml".to_string()
}

/// How join credentials are issued during a deployment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPolicy {
	/// One credential per run, shared by every worker.
	#[default]
	IssueOnce,
	/// A fresh credential for every worker join.
	PerWorker,
}

impl FromStr for TokenPolicy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().replace('-', "_").as_str() {
			"issue_once" | "once" => Ok(TokenPolicy::IssueOnce),
			"per_worker" => Ok(TokenPolicy::PerWorker),
			other => Err(ConfigError::invalid_value(
				"cluster.token_policy",
				format!("unknown policy '{other}' (expected issue_once or per_worker)"),
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfigLayer {
	pub kubernetes_version: Option<String>,
	pub package_revision: Option<String>,
	pub pod_network_cidr: Option<String>,
	pub api_server_port: Option<u16>,
	pub network_plugin_manifest: Option<String>,
	pub token_ttl_hours: Option<u32>,
	pub token_policy: Option<TokenPolicy>,
	pub ignore_preflight_errors: Option<Vec<String>>,
}

impl ClusterConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.kubernetes_version.is_some() {
			self.kubernetes_version = other.kubernetes_version;
		}
		if other.package_revision.is_some() {
			self.package_revision = other.package_revision;
		}
		if other.pod_network_cidr.is_some() {
			self.pod_network_cidr = other.pod_network_cidr;
		}
		if other.api_server_port.is_some() {
			self.api_server_port = other.api_server_port;
		}
		if other.network_plugin_manifest.is_some() {
			self.network_plugin_manifest = other.network_plugin_manifest;
		}
		if other.token_ttl_hours.is_some() {
			self.token_ttl_hours = other.token_ttl_hours;
		}
		if other.token_policy.is_some() {
			self.token_policy = other.token_policy;
		}
		if other.ignore_preflight_errors.is_some() {
			self.ignore_preflight_errors = other.ignore_preflight_errors;
		}
	}

	pub fn finalize(self) -> ClusterConfig {
		let defaults = ClusterConfig::default();
		ClusterConfig {
			kubernetes_version: self
				.kubernetes_version
				.map(|v| v.trim_start_matches('v').to_string())
				.unwrap_or(defaults.kubernetes_version),
			package_revision: self.package_revision.unwrap_or(defaults.package_revision),
			pod_network_cidr: self.pod_network_cidr.unwrap_or(defaults.pod_network_cidr),
			api_server_port: self.api_server_port.unwrap_or(defaults.api_server_port),
			network_plugin_manifest: self
				.network_plugin_manifest
				.unwrap_or_else(default_network_plugin_manifest),
			token_ttl_hours: self.token_ttl_hours.unwrap_or(defaults.token_ttl_hours),
			token_policy: self.token_policy.unwrap_or_default(),
			ignore_preflight_errors: self.ignore_preflight_errors.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
	/// Pinned Kubernetes version, e.g. `1.30.2`.
	pub kubernetes_version: String,
	/// Debian package revision appended to the version on pkgs.k8s.io.
	pub package_revision: String,
	pub pod_network_cidr: String,
	pub api_server_port: u16,
	pub network_plugin_manifest: String,
	pub token_ttl_hours: u32,
	pub token_policy: TokenPolicy,
	pub ignore_preflight_errors: Vec<String>,
}

impl ClusterConfig {
	/// The `MAJOR.MINOR` part of the pinned version, used for the package
	/// repository path.
	pub fn minor_version(&self) -> String {
		let mut parts = self.kubernetes_version.split('.');
		match (parts.next(), parts.next()) {
			(Some(major), Some(minor)) => format!("{major}.{minor}"),
			_ => self.kubernetes_version.clone(),
		}
	}

	/// Full apt package version, e.g. `1.30.2-1.1`.
	pub fn package_version(&self) -> String {
		format!("{}-{}", self.kubernetes_version, self.package_revision)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_version(&self.kubernetes_version)?;
		validate_cidr(&self.pod_network_cidr)?;
		if self.api_server_port == 0 {
			return Err(ConfigError::invalid_value(
				"cluster.api_server_port",
				"must be non-zero",
			));
		}
		if self.token_ttl_hours == 0 {
			return Err(ConfigError::invalid_value(
				"cluster.token_ttl_hours",
				"non-expiring join tokens are not allowed",
			));
		}
		if self.network_plugin_manifest.trim().is_empty() {
			return Err(ConfigError::invalid_value(
				"cluster.network_plugin_manifest",
				"must not be empty",
			));
		}
		Ok(())
	}
}

impl Default for ClusterConfig {
	fn default() -> Self {
		Self {
			kubernetes_version: "1.30.2".to_string(),
			package_revision: "1.1".to_string(),
			pod_network_cidr: "10.244.0.0/16".to_string(),
			api_server_port: 6443,
			network_plugin_manifest: default_network_plugin_manifest(),
			token_ttl_hours: 24,
			token_policy: TokenPolicy::IssueOnce,
			ignore_preflight_errors: Vec::new(),
		}
	}
}

fn validate_version(version: &str) -> Result<(), ConfigError> {
	let parts: Vec<&str> = version.split('.').collect();
	let well_formed = parts.len() == 3
		&& parts
			.iter()
			.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
	if well_formed {
		Ok(())
	} else {
		Err(ConfigError::invalid_value(
			"cluster.kubernetes_version",
			format!("'{version}' is not MAJOR.MINOR.PATCH"),
		))
	}
}

fn validate_cidr(cidr: &str) -> Result<(), ConfigError> {
	let invalid = || {
		ConfigError::invalid_value(
			"cluster.pod_network_cidr",
			format!("'{cidr}' is not an IPv4 CIDR"),
		)
	};
	let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
	addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
	let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
	if prefix > 32 {
		return Err(invalid());
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = ClusterConfig::default();
		assert_eq!(config.kubernetes_version, "1.30.2");
		assert_eq!(config.pod_network_cidr, "10.244.0.0/16");
		assert_eq!(config.token_ttl_hours, 24);
		assert_eq!(config.token_policy, TokenPolicy::IssueOnce);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_version_helpers() {
		let config = ClusterConfig {
			kubernetes_version: "1.29.7".to_string(),
			package_revision: "1.1".to_string(),
			..Default::default()
		};
		assert_eq!(config.minor_version(), "1.29");
		assert_eq!(config.package_version(), "1.29.7-1.1");
	}

	#[test]
	fn test_finalize_strips_v_prefix() {
		let layer = ClusterConfigLayer {
			kubernetes_version: Some("v1.31.0".to_string()),
			..Default::default()
		};
		assert_eq!(layer.finalize().kubernetes_version, "1.31.0");
	}

	#[test]
	fn test_validate_rejects_bad_version() {
		let config = ClusterConfig {
			kubernetes_version: "1.30".to_string(),
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_validate_rejects_bad_cidr() {
		for cidr in ["10.244.0.0", "10.244.0.0/33", "not-a-cidr/16", "10.244.0/16"] {
			let config = ClusterConfig {
				pod_network_cidr: cidr.to_string(),
				..Default::default()
			};
			assert!(config.validate().is_err(), "{cidr} should be rejected");
		}
	}

	#[test]
	fn test_validate_rejects_zero_ttl() {
		let config = ClusterConfig {
			token_ttl_hours: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_token_policy_parse() {
		assert_eq!(
			"per-worker".parse::<TokenPolicy>().unwrap(),
			TokenPolicy::PerWorker
		);
		assert_eq!(
			"issue_once".parse::<TokenPolicy>().unwrap(),
			TokenPolicy::IssueOnce
		);
		assert!("never".parse::<TokenPolicy>().is_err());
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let toml_str = r#"
kubernetes_version = "1.31.1"
token_policy = "per_worker"
ignore_preflight_errors = ["NumCPU"]
"#;
		let layer: ClusterConfigLayer = toml::from_str(toml_str).unwrap();
		assert_eq!(layer.kubernetes_version, Some("1.31.1".to_string()));
		assert_eq!(layer.token_policy, Some(TokenPolicy::PerWorker));
		assert_eq!(
			layer.ignore_preflight_errors,
			Some(vec!["NumCPU".to_string()])
		);
		assert!(layer.pod_network_cidr.is_none());
	}
}
