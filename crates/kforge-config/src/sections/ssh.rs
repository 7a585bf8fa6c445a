// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH configuration section.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the SSH client treats unknown or changed host keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
	/// Refuse hosts not already in known_hosts.
	Strict,
	/// Record new hosts, refuse changed keys.
	#[default]
	AcceptNew,
	/// Disable host key checking entirely (lab use only).
	Off,
}

impl HostKeyPolicy {
	/// Value for ssh's `StrictHostKeyChecking` option.
	pub fn ssh_option_value(&self) -> &'static str {
		match self {
			HostKeyPolicy::Strict => "yes",
			HostKeyPolicy::AcceptNew => "accept-new",
			HostKeyPolicy::Off => "no",
		}
	}
}

impl FromStr for HostKeyPolicy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().replace('-', "_").as_str() {
			"strict" | "yes" => Ok(HostKeyPolicy::Strict),
			"accept_new" => Ok(HostKeyPolicy::AcceptNew),
			"off" | "no" => Ok(HostKeyPolicy::Off),
			other => Err(ConfigError::invalid_value(
				"ssh.host_key_policy",
				format!("unknown policy '{other}' (expected strict, accept_new or off)"),
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SshConfigLayer {
	pub user: Option<String>,
	pub port: Option<u16>,
	pub identity_file: Option<PathBuf>,
	pub use_agent: Option<bool>,
	pub sudo: Option<bool>,
	pub connect_timeout_secs: Option<u64>,
	pub command_timeout_secs: Option<u64>,
	pub host_key_policy: Option<HostKeyPolicy>,
	pub known_hosts_file: Option<PathBuf>,
}

impl SshConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.user.is_some() {
			self.user = other.user;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
		if other.identity_file.is_some() {
			self.identity_file = other.identity_file;
		}
		if other.use_agent.is_some() {
			self.use_agent = other.use_agent;
		}
		if other.sudo.is_some() {
			self.sudo = other.sudo;
		}
		if other.connect_timeout_secs.is_some() {
			self.connect_timeout_secs = other.connect_timeout_secs;
		}
		if other.command_timeout_secs.is_some() {
			self.command_timeout_secs = other.command_timeout_secs;
		}
		if other.host_key_policy.is_some() {
			self.host_key_policy = other.host_key_policy;
		}
		if other.known_hosts_file.is_some() {
			self.known_hosts_file = other.known_hosts_file;
		}
	}

	pub fn finalize(self) -> SshConfig {
		let defaults = SshConfig::default();
		let user = self.user.unwrap_or(defaults.user);
		// Root logins run scripts directly; everyone else goes through sudo.
		let sudo = self.sudo.unwrap_or(user != "root");
		SshConfig {
			user,
			port: self.port.unwrap_or(defaults.port),
			identity_file: self.identity_file,
			use_agent: self.use_agent.unwrap_or(defaults.use_agent),
			sudo,
			connect_timeout_secs: self
				.connect_timeout_secs
				.unwrap_or(defaults.connect_timeout_secs),
			command_timeout_secs: self
				.command_timeout_secs
				.unwrap_or(defaults.command_timeout_secs),
			host_key_policy: self.host_key_policy.unwrap_or(defaults.host_key_policy),
			known_hosts_file: self.known_hosts_file,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshConfig {
	pub user: String,
	pub port: u16,
	pub identity_file: Option<PathBuf>,
	pub use_agent: bool,
	pub sudo: bool,
	pub connect_timeout_secs: u64,
	pub command_timeout_secs: u64,
	pub host_key_policy: HostKeyPolicy,
	pub known_hosts_file: Option<PathBuf>,
}

impl Default for SshConfig {
	fn default() -> Self {
		Self {
			user: "ubuntu".to_string(),
			port: 22,
			identity_file: None,
			use_agent: true,
			sudo: true,
			connect_timeout_secs: 10,
			command_timeout_secs: 900, // 15 minutes, package upgrades are slow
			host_key_policy: HostKeyPolicy::AcceptNew,
			known_hosts_file: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = SshConfig::default();
		assert_eq!(config.user, "ubuntu");
		assert_eq!(config.port, 22);
		assert!(config.sudo);
		assert_eq!(config.host_key_policy, HostKeyPolicy::AcceptNew);
	}

	#[test]
	fn test_root_user_disables_sudo_by_default() {
		let layer = SshConfigLayer {
			user: Some("root".to_string()),
			..Default::default()
		};
		let config = layer.finalize();
		assert!(!config.sudo);
	}

	#[test]
	fn test_explicit_sudo_wins_over_user_heuristic() {
		let layer = SshConfigLayer {
			user: Some("root".to_string()),
			sudo: Some(true),
			..Default::default()
		};
		assert!(layer.finalize().sudo);
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = SshConfigLayer {
			user: Some("ubuntu".to_string()),
			port: Some(22),
			..Default::default()
		};
		let overlay = SshConfigLayer {
			port: Some(2222),
			..Default::default()
		};
		base.merge(overlay);
		assert_eq!(base.user, Some("ubuntu".to_string()));
		assert_eq!(base.port, Some(2222));
	}

	#[test]
	fn test_host_key_policy_parse() {
		assert_eq!(
			"accept-new".parse::<HostKeyPolicy>().unwrap(),
			HostKeyPolicy::AcceptNew
		);
		assert_eq!("STRICT".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::Strict);
		assert_eq!("off".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::Off);
		assert!("sometimes".parse::<HostKeyPolicy>().is_err());
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let toml_str = r#"
user = "admin"
host_key_policy = "strict"
"#;
		let layer: SshConfigLayer = toml::from_str(toml_str).unwrap();
		assert_eq!(layer.user, Some("admin".to_string()));
		assert_eq!(layer.host_key_policy, Some(HostKeyPolicy::Strict));
		assert!(layer.port.is_none());
	}
}
