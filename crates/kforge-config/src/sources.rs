// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files, environment variables and
//! command-line overrides.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::KforgeConfigLayer;
use crate::sections::{
	ClusterConfigLayer, HostKeyPolicy, InventoryConfigLayer, LogFormat, LoggingConfigLayer,
	OrchestrationConfigLayer, SshConfigLayer, TokenPolicy, VerifyConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	UserFile = 30,
	ExplicitFile = 40,
	Environment = 50,
	Cli = 60,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<KforgeConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<KforgeConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(KforgeConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
	precedence: Precedence,
	required: bool,
}

impl TomlSource {
	/// `/etc/kforge/config.toml`, skipped when absent.
	pub fn system() -> Self {
		Self {
			path: PathBuf::from("/etc/kforge/config.toml"),
			precedence: Precedence::SystemFile,
			required: false,
		}
	}

	/// `$XDG_CONFIG_HOME/kforge/config.toml`, skipped when absent.
	pub fn user() -> Option<Self> {
		let config_home = std::env::var_os("XDG_CONFIG_HOME")
			.map(PathBuf::from)
			.or_else(dirs::config_dir)?;
		Some(Self {
			path: config_home.join("kforge/config.toml"),
			precedence: Precedence::UserFile,
			required: false,
		})
	}

	/// A file named on the command line; it is an error for it to be missing.
	pub fn explicit(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			precedence: Precedence::ExplicitFile,
			required: true,
		}
	}

	pub fn path(&self) -> &PathBuf {
		&self.path
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<KforgeConfigLayer, ConfigError> {
		if !self.path.exists() {
			if self.required {
				return Err(ConfigError::FileNotFound(self.path.clone()));
			}
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(KforgeConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: KforgeConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: KFORGE_<SECTION>_<FIELD>
pub struct EnvSource {
	lookup: EnvLookup,
}

impl EnvSource {
	pub fn new() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	/// Read variables through a custom lookup instead of the process
	/// environment.
	pub fn with_lookup<F>(lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String> + Send + Sync + 'static,
	{
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self
			.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| {
				ConfigError::invalid_value(name, format!("cannot parse '{v}'"))
			}),
			None => Ok(None),
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|v| {
			v.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect()
		})
	}

	fn parse_with<T>(
		&self,
		name: &str,
		parse: impl Fn(&str) -> Result<T, ConfigError>,
	) -> Result<Option<T>, ConfigError> {
		self.var(name).map(|v| parse(&v)).transpose()
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<KforgeConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(KforgeConfigLayer {
			ssh: Some(SshConfigLayer {
				user: self.var("KFORGE_SSH_USER"),
				port: self.parse("KFORGE_SSH_PORT")?,
				identity_file: self.var("KFORGE_SSH_IDENTITY_FILE").map(PathBuf::from),
				use_agent: self.bool("KFORGE_SSH_USE_AGENT"),
				sudo: self.bool("KFORGE_SSH_SUDO"),
				connect_timeout_secs: self.parse("KFORGE_SSH_CONNECT_TIMEOUT_SECS")?,
				command_timeout_secs: self.parse("KFORGE_SSH_COMMAND_TIMEOUT_SECS")?,
				host_key_policy: self
					.parse_with("KFORGE_SSH_HOST_KEY_POLICY", HostKeyPolicy::from_str)?,
				known_hosts_file: self.var("KFORGE_SSH_KNOWN_HOSTS_FILE").map(PathBuf::from),
			}),
			cluster: Some(ClusterConfigLayer {
				kubernetes_version: self.var("KFORGE_CLUSTER_KUBERNETES_VERSION"),
				package_revision: self.var("KFORGE_CLUSTER_PACKAGE_REVISION"),
				pod_network_cidr: self.var("KFORGE_CLUSTER_POD_NETWORK_CIDR"),
				api_server_port: self.parse("KFORGE_CLUSTER_API_SERVER_PORT")?,
				network_plugin_manifest: self.var("KFORGE_CLUSTER_NETWORK_PLUGIN_MANIFEST"),
				token_ttl_hours: self.parse("KFORGE_CLUSTER_TOKEN_TTL_HOURS")?,
				token_policy: self
					.parse_with("KFORGE_CLUSTER_TOKEN_POLICY", TokenPolicy::from_str)?,
				ignore_preflight_errors: self.list("KFORGE_CLUSTER_IGNORE_PREFLIGHT_ERRORS"),
			}),
			runtime: None,
			orchestration: Some(OrchestrationConfigLayer {
				max_parallel: self.parse("KFORGE_ORCHESTRATION_MAX_PARALLEL")?,
				network_plugin_grace_secs: self
					.parse("KFORGE_ORCHESTRATION_NETWORK_PLUGIN_GRACE_SECS")?,
				allow_partial_inventory: self.bool("KFORGE_ORCHESTRATION_ALLOW_PARTIAL_INVENTORY"),
				probe_timeout_secs: self.parse("KFORGE_ORCHESTRATION_PROBE_TIMEOUT_SECS")?,
			}),
			verify: Some(VerifyConfigLayer {
				poll_interval_secs: self.parse("KFORGE_VERIFY_POLL_INTERVAL_SECS")?,
				timeout_secs: self.parse("KFORGE_VERIFY_TIMEOUT_SECS")?,
			}),
			inventory: Some(InventoryConfigLayer {
				control_plane: self.var("KFORGE_INVENTORY_CONTROL_PLANE"),
				workers: self.list("KFORGE_INVENTORY_WORKERS"),
				terraform_output: self.var("KFORGE_INVENTORY_TERRAFORM_OUTPUT").map(PathBuf::from),
				terraform_control_plane_key: None,
				terraform_workers_key: None,
			}),
			logging: Some(LoggingConfigLayer {
				level: self.var("KFORGE_LOG_LEVEL"),
				format: self.parse_with("KFORGE_LOG_FORMAT", LogFormat::from_str)?,
			}),
		})
	}
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub config_file: Option<PathBuf>,
	pub log_level: Option<String>,
	pub log_format: Option<LogFormat>,
	pub ssh_user: Option<String>,
	pub ssh_port: Option<u16>,
	pub identity_file: Option<PathBuf>,
	pub max_parallel: Option<usize>,
}

/// Command-line override source; always wins.
pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<KforgeConfigLayer, ConfigError> {
		let o = &self.overrides;
		Ok(KforgeConfigLayer {
			ssh: Some(SshConfigLayer {
				user: o.ssh_user.clone(),
				port: o.ssh_port,
				identity_file: o.identity_file.clone(),
				..Default::default()
			}),
			orchestration: Some(OrchestrationConfigLayer {
				max_parallel: o.max_parallel,
				..Default::default()
			}),
			logging: Some(LoggingConfigLayer {
				level: o.log_level.clone(),
				format: o.log_format,
			}),
			..Default::default()
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn env_from(pairs: &[(&str, &str)]) -> EnvSource {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		EnvSource::with_lookup(move |name| map.get(name).cloned())
	}

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Defaults < Precedence::SystemFile);
		assert!(Precedence::UserFile < Precedence::ExplicitFile);
		assert!(Precedence::ExplicitFile < Precedence::Environment);
		assert!(Precedence::Environment < Precedence::Cli);
	}

	#[test]
	fn test_env_source_reads_values() {
		let env = env_from(&[
			("KFORGE_SSH_USER", "admin"),
			("KFORGE_SSH_PORT", "2200"),
			("KFORGE_CLUSTER_TOKEN_POLICY", "per_worker"),
			("KFORGE_INVENTORY_WORKERS", "10.0.0.2, 10.0.0.3,"),
			("KFORGE_ORCHESTRATION_ALLOW_PARTIAL_INVENTORY", "1"),
		]);
		let layer = env.load().unwrap();
		let ssh = layer.ssh.unwrap();
		assert_eq!(ssh.user, Some("admin".to_string()));
		assert_eq!(ssh.port, Some(2200));
		assert_eq!(
			layer.cluster.unwrap().token_policy,
			Some(TokenPolicy::PerWorker)
		);
		assert_eq!(
			layer.inventory.unwrap().workers,
			Some(vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()])
		);
		assert_eq!(
			layer.orchestration.unwrap().allow_partial_inventory,
			Some(true)
		);
	}

	#[test]
	fn test_env_source_ignores_empty_values() {
		let env = env_from(&[("KFORGE_SSH_USER", "")]);
		let layer = env.load().unwrap();
		assert!(layer.ssh.unwrap().user.is_none());
	}

	#[test]
	fn test_env_source_rejects_bad_number() {
		let env = env_from(&[("KFORGE_SSH_PORT", "twenty-two")]);
		let err = env.load().unwrap_err();
		assert!(err.to_string().contains("KFORGE_SSH_PORT"));
	}

	#[test]
	fn test_toml_source_missing_optional_file_is_empty() {
		let source = TomlSource {
			path: PathBuf::from("/nonexistent/kforge.toml"),
			precedence: Precedence::SystemFile,
			required: false,
		};
		let layer = source.load().unwrap();
		assert!(layer.ssh.is_none());
	}

	#[test]
	fn test_toml_source_missing_explicit_file_errors() {
		let source = TomlSource::explicit("/nonexistent/kforge.toml");
		assert!(matches!(
			source.load(),
			Err(ConfigError::FileNotFound(_))
		));
	}

	#[test]
	fn test_toml_source_parses_file() {
		let mut file = NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[ssh]
user = "deploy"

[cluster]
kubernetes_version = "1.31.0"
"#
		)
		.unwrap();
		let layer = TomlSource::explicit(file.path()).load().unwrap();
		assert_eq!(layer.ssh.unwrap().user, Some("deploy".to_string()));
		assert_eq!(
			layer.cluster.unwrap().kubernetes_version,
			Some("1.31.0".to_string())
		);
	}

	#[test]
	fn test_toml_source_reports_parse_errors_with_path() {
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "[ssh\nuser = ").unwrap();
		let err = TomlSource::explicit(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_cli_source_only_sets_given_values() {
		let layer = CliSource::new(CliOverrides {
			ssh_port: Some(2022),
			..Default::default()
		})
		.load()
		.unwrap();
		let ssh = layer.ssh.unwrap();
		assert_eq!(ssh.port, Some(2022));
		assert!(ssh.user.is_none());
	}
}
