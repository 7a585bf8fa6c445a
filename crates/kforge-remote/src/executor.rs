// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kforge_inventory::Node;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;

/// A rendered script, ready to stream to a node.
///
/// `Debug` omits the body, which may embed a join token.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteScript {
	/// Stable step name, used for logging and mock matching.
	pub step: String,
	/// Complete bash script body.
	pub body: String,
}

impl RemoteScript {
	pub fn new(step: impl Into<String>, body: impl Into<String>) -> Self {
		Self {
			step: step.into(),
			body: body.into(),
		}
	}
}

impl fmt::Debug for RemoteScript {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RemoteScript")
			.field("step", &self.step)
			.field("body_len", &self.body.len())
			.finish()
	}
}

impl fmt::Display for RemoteScript {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.step)
	}
}

/// Captured output of a script that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
	pub stdout: String,
	pub stderr: String,
	pub exit_code: i32,
	pub duration: Duration,
}

impl ExecOutput {
	pub fn with_stdout(stdout: impl Into<String>) -> Self {
		Self {
			stdout: stdout.into(),
			..Default::default()
		}
	}
}

/// Runs scripts on nodes.
///
/// Implementations block until the remote process exits, their own timeout
/// elapses, or `cancel` fires. They never retry.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
	async fn run(
		&self,
		node: &Node,
		script: &RemoteScript,
		cancel: &CancellationToken,
	) -> Result<ExecOutput, RemoteError>;
}
