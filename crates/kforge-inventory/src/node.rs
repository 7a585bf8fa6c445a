// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node, role and SSH identity types.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use kforge_config::SshConfig;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
	ControlPlane,
	Worker,
}

impl fmt::Display for NodeRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NodeRole::ControlPlane => f.write_str("control-plane"),
			NodeRole::Worker => f.write_str("worker"),
		}
	}
}

impl FromStr for NodeRole {
	type Err = InventoryError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"control-plane" | "controlplane" | "master" => Ok(NodeRole::ControlPlane),
			"worker" => Ok(NodeRole::Worker),
			other => Err(InventoryError::invalid(format!("unknown node role '{other}'"))),
		}
	}
}

/// How the SSH client authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "path")]
pub enum SshAuth {
	KeyFile(PathBuf),
	Agent,
}

/// Credentials used to open a session to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshIdentity {
	pub user: String,
	pub port: u16,
	pub auth: SshAuth,
}

impl SshIdentity {
	pub fn agent(user: impl Into<String>) -> Self {
		Self {
			user: user.into(),
			port: 22,
			auth: SshAuth::Agent,
		}
	}

	pub fn from_config(config: &SshConfig) -> Self {
		let auth = match &config.identity_file {
			Some(path) => SshAuth::KeyFile(path.clone()),
			None => SshAuth::Agent,
		};
		Self {
			user: config.user.clone(),
			port: config.port,
			auth,
		}
	}
}

/// A resolved cluster node. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
	role: NodeRole,
	address: String,
	credential: Arc<SshIdentity>,
}

impl Node {
	pub fn new(role: NodeRole, address: impl Into<String>, credential: Arc<SshIdentity>) -> Self {
		Self {
			role,
			address: address.into(),
			credential,
		}
	}

	pub fn role(&self) -> NodeRole {
		self.role
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn credential(&self) -> &SshIdentity {
		&self.credential
	}

	pub fn is_control_plane(&self) -> bool {
		self.role == NodeRole::ControlPlane
	}
}

impl fmt::Display for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.role, self.address)
	}
}

/// Normalize a node address: IP literals are canonicalized, hostnames are
/// lower-cased and checked for valid characters.
pub fn normalize_address(raw: &str) -> Result<String, InventoryError> {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return Err(InventoryError::invalid("empty node address"));
	}

	let unbracketed = trimmed
		.strip_prefix('[')
		.and_then(|s| s.strip_suffix(']'))
		.unwrap_or(trimmed);
	if let Ok(ip) = unbracketed.parse::<IpAddr>() {
		return Ok(ip.to_string());
	}

	let host = trimmed.to_ascii_lowercase();
	let valid = host.len() <= 253
		&& host.split('.').all(|label| {
			!label.is_empty()
				&& label.len() <= 63
				&& !label.starts_with('-')
				&& !label.ends_with('-')
				&& label
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || c == '-')
		});
	if valid {
		Ok(host)
	} else {
		Err(InventoryError::invalid(format!(
			"'{trimmed}' is neither an IP address nor a valid hostname"
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn test_role_display_and_parse() {
		assert_eq!(NodeRole::ControlPlane.to_string(), "control-plane");
		assert_eq!(NodeRole::Worker.to_string(), "worker");
		assert_eq!(
			"control-plane".parse::<NodeRole>().unwrap(),
			NodeRole::ControlPlane
		);
		assert!("etcd".parse::<NodeRole>().is_err());
	}

	#[test]
	fn test_normalize_ipv4() {
		assert_eq!(normalize_address(" 10.0.0.1 ").unwrap(), "10.0.0.1");
	}

	#[test]
	fn test_normalize_ipv6_canonicalizes() {
		assert_eq!(
			normalize_address("[2001:DB8:0:0::1]").unwrap(),
			"2001:db8::1"
		);
	}

	#[test]
	fn test_normalize_hostname_lowercases() {
		assert_eq!(
			normalize_address("Worker-1.Example.COM").unwrap(),
			"worker-1.example.com"
		);
	}

	#[test]
	fn test_normalize_rejects_garbage() {
		for raw in ["", "   ", "host name", "-bad.example", "a..b", "bad_host"] {
			assert!(normalize_address(raw).is_err(), "{raw:?} should be rejected");
		}
	}

	#[test]
	fn test_identity_from_config_prefers_key_file() {
		let config = SshConfig {
			identity_file: Some(PathBuf::from("/keys/id_ed25519")),
			..Default::default()
		};
		let identity = SshIdentity::from_config(&config);
		assert_eq!(
			identity.auth,
			SshAuth::KeyFile(PathBuf::from("/keys/id_ed25519"))
		);
		assert_eq!(identity.user, "ubuntu");
	}

	#[test]
	fn test_identity_from_config_falls_back_to_agent() {
		let identity = SshIdentity::from_config(&SshConfig::default());
		assert_eq!(identity.auth, SshAuth::Agent);
	}
}
