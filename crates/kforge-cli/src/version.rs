// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information and version utilities.

use kforge_config::ClusterConfig;

/// Platform string in `{os}-{arch}` format, e.g. "linux-x86_64".
pub const PLATFORM: &str = env!("KFORGE_PLATFORM");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format version info for display.
pub fn format_version_info() -> String {
	let cluster = ClusterConfig::default();
	format!(
		"kforge version: {VERSION}\n\
		 Platform:       {PLATFORM}\n\
		 Kubernetes:     {} (default)",
		cluster.kubernetes_version,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_info_lists_platform() {
		let info = format_version_info();
		assert!(info.contains(VERSION));
		assert!(info.contains(PLATFORM));
	}
}
