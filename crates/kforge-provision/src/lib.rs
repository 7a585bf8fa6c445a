// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote steps and the provisioning pipeline.
//!
//! [`RemoteStep`] is the catalog of everything kforge does on a node, from
//! disabling swap to joining a worker. [`ProvisioningPipeline`] applies the
//! node preparation subset to every node in the inventory.

pub mod error;
pub mod pipeline;
pub mod step;
pub mod token;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{provisioning_steps, NodeProvision, ProvisioningPipeline};
pub use step::{
	quote, RemoteStep, ALREADY_INITIALIZED, ALREADY_JOINED, INIT_LOCK_HELD_EXIT, STATE_DIR,
};
pub use token::JoinToken;
