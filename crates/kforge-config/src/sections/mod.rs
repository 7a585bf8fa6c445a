// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod cluster;
mod inventory;
mod logging;
mod orchestration;
mod runtime;
mod ssh;

pub use cluster::{ClusterConfig, ClusterConfigLayer, TokenPolicy};
pub use inventory::{InventoryConfig, InventoryConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use orchestration::{
	OrchestrationConfig, OrchestrationConfigLayer, VerifyConfig, VerifyConfigLayer,
};
pub use runtime::{RuntimeConfig, RuntimeConfigLayer};
pub use ssh::{HostKeyPolicy, SshConfig, SshConfigLayer};
