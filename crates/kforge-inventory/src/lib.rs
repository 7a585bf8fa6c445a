// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node inventory for kforge.
//!
//! Turns operator input (CLI arguments, config, Terraform output) into a
//! validated [`Inventory`] of role-tagged [`Node`]s and probes each node for
//! liveness before anything is mutated.

pub mod error;
pub mod node;
pub mod probe;
pub mod resolver;
pub mod terraform;

pub use error::{InventoryError, InventoryResult};
pub use node::{normalize_address, Node, NodeRole, SshAuth, SshIdentity};
pub use probe::{HostProbe, MockProbe, TcpProbe};
pub use resolver::{
	Inventory, InventoryResolver, InventorySpec, ResolvedInventory, UnreachableHost,
};
pub use terraform::{load_terraform_output, parse_terraform_output, TerraformKeys};
