// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control-plane and worker state machines.

use std::fmt;

use serde::Serialize;

use crate::error::BootstrapError;

/// Lifecycle of the control-plane bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
	Uninitialized,
	Initializing,
	Initialized,
	/// Terminal. Recovery requires `kforge reset` and a new run.
	InitFailed,
	NetworkPluginInstalling,
	CredentialIssued,
}

impl ControllerState {
	pub fn can_transition_to(self, to: ControllerState) -> bool {
		use ControllerState::*;
		matches!(
			(self, to),
			(Uninitialized, Initializing)
				| (Initializing, Initialized)
				| (Initializing, InitFailed)
				| (Initialized, NetworkPluginInstalling)
				| (NetworkPluginInstalling, CredentialIssued)
				// Per-worker token policy issues again after the first credential.
				| (CredentialIssued, CredentialIssued)
		)
	}

	/// Move to `to`, or fail with `IllegalTransition` leaving `self` unchanged.
	pub fn transition(&mut self, to: ControllerState) -> Result<(), BootstrapError> {
		if self.can_transition_to(to) {
			*self = to;
			Ok(())
		} else {
			Err(BootstrapError::IllegalTransition { from: *self, to })
		}
	}
}

impl fmt::Display for ControllerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ControllerState::Uninitialized => "uninitialized",
			ControllerState::Initializing => "initializing",
			ControllerState::Initialized => "initialized",
			ControllerState::InitFailed => "init-failed",
			ControllerState::NetworkPluginInstalling => "network-plugin-installing",
			ControllerState::CredentialIssued => "credential-issued",
		};
		f.write_str(s)
	}
}

/// Lifecycle of one worker's join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerJoinState {
	Pending,
	JoinRequested,
	Joined,
	JoinFailed,
	/// The join may or may not have happened (timeout or cancellation).
	Unknown,
}

impl WorkerJoinState {
	pub fn can_transition_to(self, to: WorkerJoinState) -> bool {
		use WorkerJoinState::*;
		matches!(
			(self, to),
			(Pending, JoinRequested)
				// Rejected locally, e.g. an expired credential.
				| (Pending, JoinFailed)
				| (JoinRequested, Joined)
				| (JoinRequested, JoinFailed)
				| (JoinRequested, Unknown)
		)
	}

	pub fn transition(&mut self, to: WorkerJoinState) -> Result<(), BootstrapError> {
		if self.can_transition_to(to) {
			*self = to;
			Ok(())
		} else {
			Err(BootstrapError::IllegalWorkerTransition { from: *self, to })
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			WorkerJoinState::Joined | WorkerJoinState::JoinFailed | WorkerJoinState::Unknown
		)
	}
}

impl fmt::Display for WorkerJoinState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			WorkerJoinState::Pending => "pending",
			WorkerJoinState::JoinRequested => "join-requested",
			WorkerJoinState::Joined => "joined",
			WorkerJoinState::JoinFailed => "join-failed",
			WorkerJoinState::Unknown => "unknown",
		};
		f.write_str(s)
	}
}
