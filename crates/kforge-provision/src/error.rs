// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use kforge_remote::RemoteError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
	#[error("step {step} failed: {source}")]
	StepFailed {
		step: &'static str,
		#[source]
		source: RemoteError,
	},

	#[error("provisioning task panicked: {message}")]
	TaskPanicked { message: String },
}

impl PipelineError {
	/// True when the node may be partially provisioned and its state is
	/// unknown rather than failed.
	pub fn is_indeterminate(&self) -> bool {
		match self {
			PipelineError::StepFailed { source, .. } => source.is_indeterminate(),
			PipelineError::TaskPanicked { .. } => false,
		}
	}

	pub fn step(&self) -> Option<&'static str> {
		match self {
			PipelineError::StepFailed { step, .. } => Some(step),
			PipelineError::TaskPanicked { .. } => None,
		}
	}
}
