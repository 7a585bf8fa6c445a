// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use kforge_inventory::InventoryError;
use kforge_remote::RemoteError;
use thiserror::Error;

use crate::state::{ControllerState, WorkerJoinState};

/// Result type alias for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
	#[error("illegal control-plane transition from {from} to {to}")]
	IllegalTransition {
		from: ControllerState,
		to: ControllerState,
	},

	#[error("illegal worker transition from {from} to {to}")]
	IllegalWorkerTransition {
		from: WorkerJoinState,
		to: WorkerJoinState,
	},

	#[error(
		"control plane {address} has an init lock from an unfinished attempt; \
		 run `kforge reset {address}` before deploying again"
	)]
	InitLockHeld { address: String },

	#[error("control plane init failed: {source}")]
	InitFailed {
		#[source]
		source: RemoteError,
	},

	#[error("network plugin install failed: {source}")]
	NetworkPlugin {
		#[source]
		source: RemoteError,
	},

	#[error("issuing join credential failed: {source}")]
	CredentialIssue {
		#[source]
		source: RemoteError,
	},

	#[error("invalid join credential: {reason}")]
	InvalidCredential { reason: String },

	#[error("join credential expired at {expired_at}")]
	CredentialExpired { expired_at: DateTime<Utc> },

	#[error("no join credential has been issued")]
	CredentialNotIssued,

	#[error("worker {node} failed to join: {source}")]
	WorkerJoinFailed {
		node: String,
		#[source]
		source: RemoteError,
	},

	#[error("bootstrap cancelled")]
	Cancelled,
}

impl BootstrapError {
	/// True when the remote side may or may not have applied the change.
	pub fn is_indeterminate(&self) -> bool {
		match self {
			BootstrapError::InitFailed { source }
			| BootstrapError::NetworkPlugin { source }
			| BootstrapError::CredentialIssue { source }
			| BootstrapError::WorkerJoinFailed { source, .. } => source.is_indeterminate(),
			BootstrapError::Cancelled => true,
			_ => false,
		}
	}
}

/// Errors that abort a deployment before any node is mutated.
#[derive(Debug, Error)]
pub enum DeployError {
	#[error(transparent)]
	Inventory(#[from] InventoryError),

	#[error("worker deployment requires a join credential")]
	MissingCredential,

	#[error(transparent)]
	Credential(#[from] BootstrapError),
}
