// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Validation and liveness probing of the node inventory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{InventoryError, InventoryResult};
use crate::node::{normalize_address, Node, NodeRole, SshIdentity};
use crate::probe::HostProbe;

/// Raw, unvalidated inventory as supplied by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySpec {
	pub control_plane: String,
	pub workers: Vec<String>,
}

impl InventorySpec {
	pub fn new(control_plane: impl Into<String>, workers: Vec<String>) -> Self {
		Self {
			control_plane: control_plane.into(),
			workers,
		}
	}
}

/// A validated inventory: one control-plane node and at least one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
	control_plane: Node,
	workers: Vec<Node>,
}

impl Inventory {
	pub fn control_plane(&self) -> &Node {
		&self.control_plane
	}

	pub fn workers(&self) -> &[Node] {
		&self.workers
	}

	/// Control plane first, then workers in input order.
	pub fn nodes(&self) -> impl Iterator<Item = &Node> {
		std::iter::once(&self.control_plane).chain(self.workers.iter())
	}

	pub fn len(&self) -> usize {
		1 + self.workers.len()
	}

	pub fn is_empty(&self) -> bool {
		false
	}
}

/// A node that failed its liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreachableHost {
	pub role: NodeRole,
	pub address: String,
	pub reason: String,
}

/// Result of [`InventoryResolver::resolve`]: the full validated inventory plus
/// a per-node record of probe failures. The caller decides how to proceed.
#[derive(Debug, Clone)]
pub struct ResolvedInventory {
	pub inventory: Inventory,
	pub unreachable: Vec<UnreachableHost>,
}

impl ResolvedInventory {
	pub fn is_fully_reachable(&self) -> bool {
		self.unreachable.is_empty()
	}

	/// Apply the reduced-node-set policy.
	///
	/// An unreachable control plane is always fatal. Unreachable workers are
	/// fatal unless `allow_partial` is set, in which case they are dropped and
	/// returned so they can be reported as skipped.
	pub fn into_reachable(
		self,
		allow_partial: bool,
	) -> InventoryResult<(Inventory, Vec<UnreachableHost>)> {
		if let Some(cp) = self
			.unreachable
			.iter()
			.find(|u| u.role == NodeRole::ControlPlane)
		{
			return Err(InventoryError::UnreachableHost {
				role: cp.role,
				address: cp.address.clone(),
				reason: cp.reason.clone(),
			});
		}

		if self.unreachable.is_empty() {
			return Ok((self.inventory, Vec::new()));
		}

		let reachable_workers: Vec<Node> = self
			.inventory
			.workers
			.into_iter()
			.filter(|w| !self.unreachable.iter().any(|u| u.address == w.address()))
			.collect();

		if !allow_partial || reachable_workers.is_empty() {
			let first = &self.unreachable[0];
			return Err(InventoryError::UnreachableHost {
				role: first.role,
				address: first.address.clone(),
				reason: first.reason.clone(),
			});
		}

		warn!(
			skipped = self.unreachable.len(),
			remaining = reachable_workers.len(),
			"continuing with reduced worker set"
		);
		Ok((
			Inventory {
				control_plane: self.inventory.control_plane,
				workers: reachable_workers,
			},
			self.unreachable,
		))
	}
}

/// Validates node addresses and probes them for liveness.
pub struct InventoryResolver {
	credential: Arc<SshIdentity>,
	probe: Arc<dyn HostProbe>,
	probe_timeout: Duration,
}

impl InventoryResolver {
	pub fn new(credential: SshIdentity, probe: Arc<dyn HostProbe>, probe_timeout: Duration) -> Self {
		Self {
			credential: Arc::new(credential),
			probe,
			probe_timeout,
		}
	}

	/// Validate and normalize the inventory without touching the network.
	///
	/// Fails with `InvalidInventory` when the worker set is empty, contains a
	/// duplicate, or contains the control-plane address.
	pub fn validate(&self, spec: &InventorySpec) -> InventoryResult<Inventory> {
		let control_plane = normalize_address(&spec.control_plane)?;

		if spec.workers.is_empty() {
			return Err(InventoryError::invalid("worker set is empty"));
		}

		let mut seen = HashSet::new();
		let mut workers = Vec::with_capacity(spec.workers.len());
		for raw in &spec.workers {
			let address = normalize_address(raw)?;
			if address == control_plane {
				return Err(InventoryError::invalid(format!(
					"control-plane address {address} also listed as a worker"
				)));
			}
			if !seen.insert(address.clone()) {
				return Err(InventoryError::invalid(format!(
					"worker address {address} listed more than once"
				)));
			}
			workers.push(Node::new(
				NodeRole::Worker,
				address,
				Arc::clone(&self.credential),
			));
		}

		Ok(Inventory {
			control_plane: Node::new(
				NodeRole::ControlPlane,
				control_plane,
				Arc::clone(&self.credential),
			),
			workers,
		})
	}

	/// Validate the inventory, then probe every node concurrently.
	///
	/// Probe failures are reported per node in
	/// [`ResolvedInventory::unreachable`]; they never abort resolution.
	#[instrument(skip(self, spec), fields(workers = spec.workers.len()))]
	pub async fn resolve(&self, spec: &InventorySpec) -> InventoryResult<ResolvedInventory> {
		let inventory = self.validate(spec)?;

		let probes = inventory.nodes().map(|node| async move {
			let result = self
				.probe
				.probe(node.address(), node.credential().port, self.probe_timeout)
				.await;
			(node, result)
		});

		let mut unreachable = Vec::new();
		for (node, result) in join_all(probes).await {
			if let Err(reason) = result {
				warn!(role = %node.role(), address = node.address(), %reason, "host unreachable");
				unreachable.push(UnreachableHost {
					role: node.role(),
					address: node.address().to_string(),
					reason,
				});
			}
		}

		info!(
			nodes = inventory.len(),
			unreachable = unreachable.len(),
			"inventory resolved"
		);

		Ok(ResolvedInventory {
			inventory,
			unreachable,
		})
	}
}
