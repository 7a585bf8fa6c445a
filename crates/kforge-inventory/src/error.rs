// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

use crate::node::NodeRole;

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
	#[error("invalid inventory: {reason}")]
	InvalidInventory { reason: String },

	#[error("{role} {address} is unreachable: {reason}")]
	UnreachableHost {
		role: NodeRole,
		address: String,
		reason: String,
	},

	#[error("cannot read terraform output {path}: {message}")]
	TerraformOutput { path: PathBuf, message: String },
}

impl InventoryError {
	pub fn invalid(reason: impl Into<String>) -> Self {
		Self::InvalidInventory {
			reason: reason.into(),
		}
	}
}
