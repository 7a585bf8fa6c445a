// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Why an SSH session could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
	Authentication,
	HostKey,
	Network,
}

impl fmt::Display for ConnectionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionKind::Authentication => f.write_str("authentication"),
			ConnectionKind::HostKey => f.write_str("host key"),
			ConnectionKind::Network => f.write_str("network"),
		}
	}
}

impl ConnectionKind {
	/// Classify an ssh client failure from its stderr.
	pub fn classify(stderr: &str) -> Self {
		if stderr.contains("Host key verification failed")
			|| stderr.contains("REMOTE HOST IDENTIFICATION HAS CHANGED")
			|| stderr.contains("No ED25519 host key is known")
		{
			ConnectionKind::HostKey
		} else if stderr.contains("Permission denied")
			|| stderr.contains("Too many authentication failures")
			|| stderr.contains("no such identity")
		{
			ConnectionKind::Authentication
		} else {
			ConnectionKind::Network
		}
	}
}

/// Errors from running a script on a node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
	#[error("{kind} failure connecting to {address}: {message}")]
	Connection {
		address: String,
		kind: ConnectionKind,
		message: String,
	},

	#[error("remote script exited with status {exit_code}: {stderr}")]
	RemoteExecution { exit_code: i32, stderr: String },

	/// The remote process is not guaranteed to be dead.
	#[error("remote script did not finish within {}s, node state unknown", after.as_secs())]
	Timeout { after: Duration },

	#[error("cancelled before the remote script finished, node state unknown")]
	Cancelled,

	#[error("failed to run ssh: {message}")]
	Spawn { message: String },
}

impl RemoteError {
	/// True when the node may or may not have applied the script.
	pub fn is_indeterminate(&self) -> bool {
		matches!(self, RemoteError::Timeout { .. } | RemoteError::Cancelled)
	}

	pub fn exit_code(&self) -> Option<i32> {
		match self {
			RemoteError::RemoteExecution { exit_code, .. } => Some(*exit_code),
			_ => None,
		}
	}
}

impl From<std::io::Error> for RemoteError {
	fn from(e: std::io::Error) -> Self {
		RemoteError::Spawn {
			message: e.to_string(),
		}
	}
}
