// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inventory from a `terraform output -json` document.
//!
//! Terraform wraps every output in `{ "sensitive": .., "type": .., "value": .. }`.
//! Bare values are accepted too so hand-written fixtures stay short.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{InventoryError, InventoryResult};
use crate::resolver::InventorySpec;

/// Output names to read the control plane and workers from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerraformKeys {
	pub control_plane: String,
	pub workers: String,
}

impl Default for TerraformKeys {
	fn default() -> Self {
		Self {
			control_plane: "control_plane_ip".to_string(),
			workers: "worker_ips".to_string(),
		}
	}
}

impl TerraformKeys {
	pub fn from_config(config: &kforge_config::InventoryConfig) -> Self {
		Self {
			control_plane: config.terraform_control_plane_key.clone(),
			workers: config.terraform_workers_key.clone(),
		}
	}
}

/// Read and parse a Terraform output file.
pub fn load_terraform_output(path: &Path, keys: &TerraformKeys) -> InventoryResult<InventorySpec> {
	let raw = std::fs::read_to_string(path).map_err(|e| InventoryError::TerraformOutput {
		path: path.to_path_buf(),
		message: e.to_string(),
	})?;
	debug!(path = %path.display(), "read terraform output");
	parse_terraform_output(&raw, keys).map_err(|message| InventoryError::TerraformOutput {
		path: path.to_path_buf(),
		message,
	})
}

/// Parse a Terraform output document into an unvalidated inventory.
pub fn parse_terraform_output(raw: &str, keys: &TerraformKeys) -> Result<InventorySpec, String> {
	let doc: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
	let outputs = doc
		.as_object()
		.ok_or_else(|| "top-level value is not an object".to_string())?;

	let control_plane = outputs
		.get(&keys.control_plane)
		.map(unwrap_value)
		.ok_or_else(|| format!("missing output '{}'", keys.control_plane))?;
	let control_plane = match control_plane {
		Value::String(s) => s.clone(),
		// A single-element list is common when the control plane uses `count`.
		Value::Array(items) if items.len() == 1 => items[0]
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| format!("output '{}' is not a string", keys.control_plane))?,
		_ => return Err(format!("output '{}' is not a string", keys.control_plane)),
	};

	let workers = outputs
		.get(&keys.workers)
		.map(unwrap_value)
		.ok_or_else(|| format!("missing output '{}'", keys.workers))?;
	let workers = workers
		.as_array()
		.ok_or_else(|| format!("output '{}' is not a list", keys.workers))?
		.iter()
		.map(|v| {
			v.as_str()
				.map(str::to_string)
				.ok_or_else(|| format!("output '{}' contains a non-string entry", keys.workers))
		})
		.collect::<Result<Vec<_>, _>>()?;

	Ok(InventorySpec::new(control_plane, workers))
}

fn unwrap_value(output: &Value) -> &Value {
	match output {
		Value::Object(map) if map.contains_key("value") => &map["value"],
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const TERRAFORM_OUTPUT: &str = r#"{
  "control_plane_ip": { "sensitive": false, "type": "string", "value": "10.0.0.10" },
  "worker_ips": { "sensitive": false, "type": ["tuple", ["string", "string"]], "value": ["10.0.0.11", "10.0.0.12"] }
}"#;

	#[test]
	fn test_parse_wrapped_outputs() {
		let spec = parse_terraform_output(TERRAFORM_OUTPUT, &TerraformKeys::default()).unwrap();
		assert_eq!(spec.control_plane, "10.0.0.10");
		assert_eq!(spec.workers, vec!["10.0.0.11", "10.0.0.12"]);
	}

	#[test]
	fn test_parse_bare_values_and_custom_keys() {
		let raw = r#"{ "master": ["10.1.0.1"], "nodes": ["10.1.0.2"] }"#;
		let keys = TerraformKeys {
			control_plane: "master".to_string(),
			workers: "nodes".to_string(),
		};
		let spec = parse_terraform_output(raw, &keys).unwrap();
		assert_eq!(spec.control_plane, "10.1.0.1");
		assert_eq!(spec.workers, vec!["10.1.0.2"]);
	}

	#[test]
	fn test_missing_output_is_named() {
		let raw = r#"{ "control_plane_ip": { "value": "10.0.0.1" } }"#;
		let err = parse_terraform_output(raw, &TerraformKeys::default()).unwrap_err();
		assert!(err.contains("worker_ips"));
	}

	#[test]
	fn test_non_string_worker_rejected() {
		let raw = r#"{ "control_plane_ip": "10.0.0.1", "worker_ips": ["10.0.0.2", 7] }"#;
		assert!(parse_terraform_output(raw, &TerraformKeys::default()).is_err());
	}

	#[test]
	fn test_load_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(TERRAFORM_OUTPUT.as_bytes()).unwrap();
		let spec = load_terraform_output(file.path(), &TerraformKeys::default()).unwrap();
		assert_eq!(spec.workers.len(), 2);
	}

	#[test]
	fn test_load_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let err =
			load_terraform_output(&dir.path().join("absent.json"), &TerraformKeys::default())
				.unwrap_err();
		assert!(matches!(err, InventoryError::TerraformOutput { .. }));
	}
}
