// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Polls the control plane until every expected node is Ready.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node as KubeNode;
use kforge_config::VerifyConfig;
use kforge_inventory::Node;
use kforge_provision::RemoteStep;
use kforge_remote::{CancellationToken, RemoteError, RemoteExecutor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Observed state of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
	pub node_name: String,
	pub addresses: Vec<String>,
	pub ready: bool,
	/// Last kubelet heartbeat on the Ready condition.
	pub last_seen: Option<DateTime<Utc>>,
}

impl NodeStatus {
	/// True when `expected` is this node's name or one of its addresses.
	pub fn matches(&self, expected: &str) -> bool {
		self.node_name == expected || self.addresses.iter().any(|a| a == expected)
	}
}

#[derive(Debug, Clone, Error)]
pub enum VerifyError {
	#[error("nodes not ready after {}s", after.as_secs())]
	VerificationTimeout {
		after: Duration,
		last_snapshot: Vec<NodeStatus>,
	},

	#[error("verification cancelled")]
	Cancelled { last_snapshot: Vec<NodeStatus> },
}

impl VerifyError {
	pub fn last_snapshot(&self) -> &[NodeStatus] {
		match self {
			VerifyError::VerificationTimeout { last_snapshot, .. }
			| VerifyError::Cancelled { last_snapshot } => last_snapshot,
		}
	}
}

/// Final verification state recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
	pub timed_out: bool,
	/// Expected nodes that never reported Ready.
	pub not_ready: Vec<String>,
	pub nodes: Vec<NodeStatus>,
}

impl VerificationSummary {
	pub fn from_result(result: &Result<Vec<NodeStatus>, VerifyError>, expected: &[String]) -> Self {
		let (timed_out, nodes) = match result {
			Ok(nodes) => (false, nodes.clone()),
			Err(e) => (true, e.last_snapshot().to_vec()),
		};
		let not_ready = expected
			.iter()
			.filter(|e| !nodes.iter().any(|n| n.ready && n.matches(e)))
			.cloned()
			.collect();
		Self {
			timed_out,
			not_ready,
			nodes,
		}
	}

	/// True when `expected` was seen Ready.
	pub fn is_ready(&self, expected: &str) -> bool {
		self.nodes.iter().any(|n| n.ready && n.matches(expected))
	}
}

#[derive(Deserialize)]
struct NodeItems {
	items: Vec<KubeNode>,
}

/// Decode `kubectl get nodes -o json` output.
pub fn parse_node_list(json: &str) -> Result<Vec<NodeStatus>, serde_json::Error> {
	let list: NodeItems = serde_json::from_str(json)?;
	Ok(list.items.into_iter().map(node_status).collect())
}

fn node_status(node: KubeNode) -> NodeStatus {
	let node_name = node.metadata.name.unwrap_or_default();
	let status = node.status.unwrap_or_default();
	let addresses = status
		.addresses
		.unwrap_or_default()
		.into_iter()
		.map(|a| a.address)
		.collect();
	let ready_condition = status
		.conditions
		.unwrap_or_default()
		.into_iter()
		.find(|c| c.type_ == "Ready");
	let (ready, last_seen) = match ready_condition {
		Some(c) => (c.status == "True", c.last_heartbeat_time.map(|t| t.0)),
		None => (false, None),
	};
	NodeStatus {
		node_name,
		addresses,
		ready,
		last_seen,
	}
}

/// Polls node readiness through `kubectl` on the control plane.
pub struct VerificationProbe {
	executor: Arc<dyn RemoteExecutor>,
	control_plane: Node,
	poll_interval: Duration,
	timeout: Duration,
}

impl VerificationProbe {
	pub fn new(
		executor: Arc<dyn RemoteExecutor>,
		control_plane: Node,
		poll_interval: Duration,
		timeout: Duration,
	) -> Self {
		Self {
			executor,
			control_plane,
			poll_interval,
			timeout,
		}
	}

	pub fn from_config(executor: Arc<dyn RemoteExecutor>, control_plane: Node, config: &VerifyConfig) -> Self {
		Self::new(executor, control_plane, config.poll_interval(), config.timeout())
	}

	/// One poll of the node list.
	pub async fn snapshot(&self, cancel: &CancellationToken) -> Result<Vec<NodeStatus>, RemoteError> {
		let output = self
			.executor
			.run(&self.control_plane, &RemoteStep::ListNodes.render(), cancel)
			.await?;
		parse_node_list(&output.stdout).map_err(|e| RemoteError::RemoteExecution {
			exit_code: 0,
			stderr: format!("unparseable node list: {e}"),
		})
	}

	/// Poll until every `expected` node (by address or name) is Ready.
	///
	/// Returns within `timeout` plus scheduling slack: each poll is bounded by
	/// the time remaining. Failed polls are logged and retried on the next
	/// tick.
	#[instrument(skip_all, fields(expected = expected.len(), timeout_secs = self.timeout.as_secs()))]
	pub async fn wait_until_ready(
		&self,
		expected: &[String],
		cancel: &CancellationToken,
	) -> Result<Vec<NodeStatus>, VerifyError> {
		let deadline = Instant::now() + self.timeout;
		let mut last_snapshot = Vec::new();

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				warn!(
					ready = last_snapshot.iter().filter(|n: &&NodeStatus| n.ready).count(),
					"verification timed out"
				);
				return Err(VerifyError::VerificationTimeout {
					after: self.timeout,
					last_snapshot,
				});
			}

			match tokio::time::timeout(remaining, self.snapshot(cancel)).await {
				Ok(Ok(snapshot)) => {
					let pending: Vec<&String> = expected
						.iter()
						.filter(|e| !snapshot.iter().any(|n| n.ready && n.matches(e)))
						.collect();
					last_snapshot = snapshot;
					if pending.is_empty() {
						info!(nodes = last_snapshot.len(), "all expected nodes ready");
						return Ok(last_snapshot);
					}
					debug!(pending = ?pending, "nodes not ready yet");
				}
				Ok(Err(RemoteError::Cancelled)) => {
					return Err(VerifyError::Cancelled { last_snapshot });
				}
				Ok(Err(e)) => warn!(error = %e, "node status poll failed"),
				Err(_) => warn!("node status poll did not finish before the deadline"),
			}

			let remaining = deadline.saturating_duration_since(Instant::now());
			tokio::select! {
				_ = tokio::time::sleep(self.poll_interval.min(remaining)) => {}
				_ = cancel.cancelled() => return Err(VerifyError::Cancelled { last_snapshot }),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kforge_inventory::{NodeRole, SshIdentity};
	use kforge_remote::MockExecutor;

	fn node_list(nodes: &[(&str, &str, bool)]) -> String {
		let items: Vec<serde_json::Value> = nodes
			.iter()
			.map(|(name, address, ready)| {
				serde_json::json!({
					"apiVersion": "v1",
					"kind": "Node",
					"metadata": { "name": name },
					"status": {
						"addresses": [
							{ "type": "InternalIP", "address": address },
							{ "type": "Hostname", "address": name }
						],
						"conditions": [
							{ "type": "MemoryPressure", "status": "False" },
							{
								"type": "Ready",
								"status": if *ready { "True" } else { "False" },
								"lastHeartbeatTime": "2025-06-01T12:00:00Z"
							}
						]
					}
				})
			})
			.collect();
		serde_json::json!({ "apiVersion": "v1", "kind": "List", "items": items, "metadata": {} })
			.to_string()
	}

	fn probe(mock: &MockExecutor) -> VerificationProbe {
		VerificationProbe::new(
			Arc::new(mock.clone()),
			Node::new(
				NodeRole::ControlPlane,
				"10.0.0.1",
				Arc::new(SshIdentity::agent("ubuntu")),
			),
			Duration::from_secs(5),
			Duration::from_secs(60),
		)
	}

	#[test]
	fn test_parse_node_list() {
		let json = node_list(&[("cp", "10.0.0.1", true), ("w1", "10.0.0.2", false)]);
		let nodes = parse_node_list(&json).unwrap();
		assert_eq!(nodes.len(), 2);
		assert_eq!(nodes[0].node_name, "cp");
		assert!(nodes[0].ready);
		assert!(nodes[0].last_seen.is_some());
		assert!(!nodes[1].ready);
		assert!(nodes[1].matches("10.0.0.2"));
		assert!(nodes[1].matches("w1"));
	}

	#[test]
	fn test_node_without_status_is_not_ready() {
		let json = r#"{"items":[{"apiVersion":"v1","kind":"Node","metadata":{"name":"bare"}}]}"#;
		let nodes = parse_node_list(json).unwrap();
		assert!(!nodes[0].ready);
		assert!(nodes[0].addresses.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_returns_once_all_expected_ready() {
		let mock = MockExecutor::new().with_output(
			"list-nodes",
			node_list(&[("cp", "10.0.0.1", true), ("w1", "10.0.0.2", true)]),
		);
		let expected = vec!["10.0.0.1".to_string(), "w1".to_string()];
		let nodes = probe(&mock)
			.wait_until_ready(&expected, &CancellationToken::new())
			.await
			.unwrap();
		assert_eq!(nodes.len(), 2);
		assert_eq!(mock.count_step("list-nodes"), 1);
	}

	/// The probe must give up within timeout + poll interval and hand back
	/// the last snapshot it saw.
	#[tokio::test(start_paused = true)]
	async fn test_timeout_is_bounded_and_keeps_snapshot() {
		let mock = MockExecutor::new().with_output(
			"list-nodes",
			node_list(&[("cp", "10.0.0.1", true), ("w1", "10.0.0.2", false)]),
		);
		let expected = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
		let started = Instant::now();
		let err = probe(&mock)
			.wait_until_ready(&expected, &CancellationToken::new())
			.await
			.unwrap_err();

		assert!(started.elapsed() <= Duration::from_secs(65));
		assert!(matches!(err, VerifyError::VerificationTimeout { .. }));
		assert_eq!(err.last_snapshot().len(), 2);
		let summary = VerificationSummary::from_result(&Err(err), &expected);
		assert!(summary.timed_out);
		assert_eq!(summary.not_ready, vec!["10.0.0.2".to_string()]);
	}

	/// A poll that hangs must not stretch the overall deadline.
	#[tokio::test(start_paused = true)]
	async fn test_hanging_poll_is_bounded_by_deadline() {
		let mock = MockExecutor::new().with_delay(Duration::from_secs(3600));
		let started = Instant::now();
		let err = probe(&mock)
			.wait_until_ready(&["10.0.0.1".to_string()], &CancellationToken::new())
			.await
			.unwrap_err();
		assert!(started.elapsed() <= Duration::from_secs(65));
		assert!(err.last_snapshot().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_poll_errors_are_retried() {
		let mock = MockExecutor::new().with_error(
			"list-nodes",
			RemoteError::RemoteExecution {
				exit_code: 1,
				stderr: "connection to the server was refused".to_string(),
			},
		);
		let err = probe(&mock)
			.wait_until_ready(&["10.0.0.1".to_string()], &CancellationToken::new())
			.await
			.unwrap_err();
		assert!(matches!(err, VerifyError::VerificationTimeout { .. }));
		assert!(mock.count_step("list-nodes") >= 10);
	}
}
