// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the kforge cluster deployer.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML files,
//!   environment, command line)
//! - Type-safe configuration sections with validation
//! - Consistent environment variable naming (`KFORGE_*`)
//!
//! # Usage
//!
//! ```ignore
//! use kforge_config::{load_config, CliOverrides};
//!
//! let config = load_config(CliOverrides::default())?;
//! println!("deploying Kubernetes {}", config.cluster.kubernetes_version);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::KforgeConfigLayer;
pub use sections::*;
pub use sources::{
	CliOverrides, CliSource, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource,
};

use tracing::{debug, info};

/// Fully resolved deployer configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KforgeConfig {
	pub ssh: SshConfig,
	pub cluster: ClusterConfig,
	pub runtime: RuntimeConfig,
	pub orchestration: OrchestrationConfig,
	pub verify: VerifyConfig,
	pub inventory: InventoryConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (`KFORGE_*`)
/// 3. Explicit `--config` file
/// 4. User file (`$XDG_CONFIG_HOME/kforge/config.toml`)
/// 5. System file (`/etc/kforge/config.toml`)
/// 6. Built-in defaults
pub fn load_config(cli: CliOverrides) -> Result<KforgeConfig, ConfigError> {
	let mut sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
	];
	if let Some(user) = TomlSource::user() {
		sources.push(Box::new(user));
	}
	if let Some(path) = &cli.config_file {
		sources.push(Box::new(TomlSource::explicit(path)));
	}
	sources.push(Box::new(EnvSource::new()));
	sources.push(Box::new(CliSource::new(cli)));

	load_from_sources(sources)
}

/// Merge the given sources in precedence order and finalize.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<KforgeConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = KforgeConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: KforgeConfigLayer) -> Result<KforgeConfig, ConfigError> {
	let config = KforgeConfig {
		ssh: layer.ssh.unwrap_or_default().finalize(),
		cluster: layer.cluster.unwrap_or_default().finalize(),
		runtime: layer.runtime.unwrap_or_default().finalize(),
		orchestration: layer.orchestration.unwrap_or_default().finalize(),
		verify: layer.verify.unwrap_or_default().finalize(),
		inventory: layer.inventory.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		ssh_user = %config.ssh.user,
		kubernetes_version = %config.cluster.kubernetes_version,
		pod_network_cidr = %config.cluster.pod_network_cidr,
		token_policy = ?config.cluster.token_policy,
		max_parallel = config.orchestration.max_parallel,
		"configuration loaded"
	);

	Ok(config)
}

/// Validate per-section and cross-field configuration rules.
fn validate_config(config: &KforgeConfig) -> Result<(), ConfigError> {
	config.cluster.validate()?;
	config.runtime.validate()?;
	config.orchestration.validate()?;
	config.verify.validate()?;

	if config.ssh.command_timeout_secs == 0 || config.ssh.connect_timeout_secs == 0 {
		return Err(ConfigError::Validation(
			"ssh timeouts must be non-zero".to_string(),
		));
	}
	if !config.ssh.use_agent && config.ssh.identity_file.is_none() {
		return Err(ConfigError::Validation(
			"ssh.use_agent is disabled and no ssh.identity_file is set; \
			 nodes could never be authenticated"
				.to_string(),
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	struct StaticSource(KforgeConfigLayer, Precedence);

	impl ConfigSource for StaticSource {
		fn name(&self) -> &'static str {
			"static"
		}

		fn precedence(&self) -> Precedence {
			self.1
		}

		fn load(&self) -> Result<KforgeConfigLayer, ConfigError> {
			Ok(self.0.clone())
		}
	}

	#[test]
	fn test_defaults_only() {
		let config = load_from_sources(vec![Box::new(DefaultsSource)]).unwrap();
		assert_eq!(config, KforgeConfig::default());
	}

	#[test]
	fn test_higher_precedence_wins_regardless_of_registration_order() {
		let cli = CliSource::new(CliOverrides {
			ssh_user: Some("from-cli".to_string()),
			..Default::default()
		});
		let env = EnvSource::with_lookup(|name| {
			let vars: HashMap<&str, &str> = [("KFORGE_SSH_USER", "from-env")].into();
			vars.get(name).map(|v| v.to_string())
		});
		let config =
			load_from_sources(vec![Box::new(cli), Box::new(env), Box::new(DefaultsSource)])
				.unwrap();
		assert_eq!(config.ssh.user, "from-cli");
	}

	#[test]
	fn test_file_layer_below_environment() {
		let file = StaticSource(
			KforgeConfigLayer {
				verify: Some(VerifyConfigLayer {
					timeout_secs: Some(300),
					poll_interval_secs: Some(10),
				}),
				..Default::default()
			},
			Precedence::ExplicitFile,
		);
		let env = EnvSource::with_lookup(|name| {
			(name == "KFORGE_VERIFY_TIMEOUT_SECS").then(|| "600".to_string())
		});
		let config = load_from_sources(vec![Box::new(env), Box::new(file)]).unwrap();
		assert_eq!(config.verify.timeout_secs, 600);
		assert_eq!(config.verify.poll_interval_secs, 10);
	}

	#[test]
	fn test_no_agent_and_no_identity_is_invalid() {
		let source = StaticSource(
			KforgeConfigLayer {
				ssh: Some(SshConfigLayer {
					use_agent: Some(false),
					..Default::default()
				}),
				..Default::default()
			},
			Precedence::ExplicitFile,
		);
		let err = load_from_sources(vec![Box::new(source)]).unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn test_section_validation_surfaces() {
		let source = StaticSource(
			KforgeConfigLayer {
				orchestration: Some(OrchestrationConfigLayer {
					max_parallel: Some(0),
					..Default::default()
				}),
				..Default::default()
			},
			Precedence::ExplicitFile,
		);
		let err = load_from_sources(vec![Box::new(source)]).unwrap_err();
		assert!(err.to_string().contains("max_parallel"));
	}
}
