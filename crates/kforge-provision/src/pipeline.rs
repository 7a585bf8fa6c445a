// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Applies the provisioning steps to nodes.

use std::sync::Arc;

use kforge_config::KforgeConfig;
use kforge_inventory::Node;
use kforge_remote::{BoundedPool, CancellationToken, RemoteError, RemoteExecutor, TaskOutcome};
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::step::RemoteStep;

/// The fixed, ordered list of steps every node goes through.
pub fn provisioning_steps(config: &KforgeConfig) -> Vec<RemoteStep> {
	vec![
		RemoteStep::DisableSwap,
		RemoteStep::UpgradePackages,
		RemoteStep::InstallBaseDependencies,
		RemoteStep::install_container_runtime(&config.runtime),
		RemoteStep::ConfigureKernelNetworking,
		RemoteStep::install_cluster_tooling(&config.cluster),
		RemoteStep::EnableNodeAgent,
	]
}

/// What happened to one node.
#[derive(Debug, Clone)]
pub struct NodeProvision {
	pub node: Node,
	/// Steps that finished successfully, in order.
	pub completed: Vec<&'static str>,
	pub result: Result<(), PipelineError>,
}

impl NodeProvision {
	pub fn is_provisioned(&self) -> bool {
		self.result.is_ok()
	}

	/// The last step that completed, if any.
	pub fn last_completed(&self) -> Option<&'static str> {
		self.completed.last().copied()
	}
}

/// Runs steps strictly in order on a node, and across nodes through a
/// bounded pool.
#[derive(Clone)]
pub struct ProvisioningPipeline {
	executor: Arc<dyn RemoteExecutor>,
	steps: Arc<Vec<RemoteStep>>,
	pool: BoundedPool,
}

impl ProvisioningPipeline {
	pub fn new(executor: Arc<dyn RemoteExecutor>, steps: Vec<RemoteStep>, max_parallel: usize) -> Self {
		Self {
			executor,
			steps: Arc::new(steps),
			pool: BoundedPool::new(max_parallel),
		}
	}

	pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &KforgeConfig) -> Self {
		Self::new(
			executor,
			provisioning_steps(config),
			config.orchestration.max_parallel,
		)
	}

	pub fn steps(&self) -> &[RemoteStep] {
		&self.steps
	}

	/// Run every step on `node`, stopping at the first failure.
	///
	/// No further steps are issued once `cancel` fires. Nothing is rolled back.
	#[instrument(skip(self, node, cancel), fields(address = node.address(), role = %node.role()))]
	pub async fn run_node(&self, node: &Node, cancel: &CancellationToken) -> NodeProvision {
		let mut completed = Vec::with_capacity(self.steps.len());

		for step in self.steps.iter() {
			let name = step.name();
			if cancel.is_cancelled() {
				warn!(step = name, "cancelled before step started");
				return NodeProvision {
					node: node.clone(),
					completed,
					result: Err(PipelineError::StepFailed {
						step: name,
						source: RemoteError::Cancelled,
					}),
				};
			}

			debug!(step = name, "applying step");
			let script = step.render();
			if let Err(source) = self.executor.run(node, &script, cancel).await {
				warn!(step = name, error = %source, "step failed, aborting pipeline for node");
				return NodeProvision {
					node: node.clone(),
					completed,
					result: Err(PipelineError::StepFailed { step: name, source }),
				};
			}
			completed.push(name);
		}

		info!(steps = completed.len(), "node provisioned");
		NodeProvision {
			node: node.clone(),
			completed,
			result: Ok(()),
		}
	}

	/// Provision all nodes, at most `max_parallel` at a time.
	///
	/// Returns one [`NodeProvision`] per node in input order. A failure on
	/// one node never affects another's result.
	#[instrument(skip_all, fields(nodes = nodes.len(), max_parallel = self.pool.limit()))]
	pub async fn run_all(&self, nodes: &[Node], cancel: &CancellationToken) -> Vec<NodeProvision> {
		let outcomes = self
			.pool
			.run(nodes.to_vec(), |node| {
				let pipeline = self.clone();
				let cancel = cancel.clone();
				async move { pipeline.run_node(&node, &cancel).await }
			})
			.await;

		outcomes
			.into_iter()
			.zip(nodes)
			.map(|(outcome, node)| match outcome {
				TaskOutcome::Completed(provision) => provision,
				TaskOutcome::Panicked(message) => NodeProvision {
					node: node.clone(),
					completed: Vec::new(),
					result: Err(PipelineError::TaskPanicked { message }),
				},
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kforge_inventory::{NodeRole, SshIdentity};
	use kforge_remote::{MockExecutor, ANY_STEP};
	use std::time::Duration;

	fn nodes(count: usize) -> Vec<Node> {
		let identity = Arc::new(SshIdentity::agent("ubuntu"));
		(1..=count)
			.map(|i| {
				let role = if i == 1 {
					NodeRole::ControlPlane
				} else {
					NodeRole::Worker
				};
				Node::new(role, format!("10.0.0.{i}"), Arc::clone(&identity))
			})
			.collect()
	}

	fn pipeline(mock: &MockExecutor, max_parallel: usize) -> ProvisioningPipeline {
		ProvisioningPipeline::from_config(Arc::new(mock.clone()), &KforgeConfig {
			orchestration: kforge_config::OrchestrationConfig {
				max_parallel,
				..Default::default()
			},
			..Default::default()
		})
	}

	#[test]
	fn test_provisioning_step_order() {
		let names: Vec<_> = provisioning_steps(&KforgeConfig::default())
			.iter()
			.map(|s| s.name())
			.collect();
		assert_eq!(
			names,
			vec![
				"disable-swap",
				"upgrade-packages",
				"install-base-dependencies",
				"install-container-runtime",
				"configure-kernel-networking",
				"install-cluster-tooling",
				"enable-node-agent",
			]
		);
	}

	#[tokio::test]
	async fn test_run_node_applies_steps_in_order() {
		let mock = MockExecutor::new();
		let all = nodes(1);
		let result = pipeline(&mock, 4)
			.run_node(&all[0], &CancellationToken::new())
			.await;

		assert!(result.is_provisioned());
		assert_eq!(result.last_completed(), Some("enable-node-agent"));
		let expected: Vec<String> = provisioning_steps(&KforgeConfig::default())
			.iter()
			.map(|s| s.name().to_string())
			.collect();
		assert_eq!(mock.steps_for("10.0.0.1"), expected);
	}

	#[tokio::test]
	async fn test_failure_aborts_remaining_steps() {
		let mock = MockExecutor::new().with_error(
			"install-container-runtime",
			RemoteError::RemoteExecution {
				exit_code: 100,
				stderr: "E: Unable to locate package".to_string(),
			},
		);
		let result = pipeline(&mock, 4)
			.run_node(&nodes(1)[0], &CancellationToken::new())
			.await;

		let err = result.result.unwrap_err();
		assert_eq!(err.step(), Some("install-container-runtime"));
		assert!(!err.is_indeterminate());
		assert_eq!(result.completed.len(), 3);
		assert_eq!(mock.call_count(), 4);
	}

	#[tokio::test]
	async fn test_one_node_failure_is_isolated() {
		let mock = MockExecutor::new().with_node_error(
			"upgrade-packages",
			"10.0.0.2",
			RemoteError::RemoteExecution {
				exit_code: 1,
				stderr: "dpkg lock".to_string(),
			},
		);
		let results = pipeline(&mock, 4)
			.run_all(&nodes(3), &CancellationToken::new())
			.await;

		assert_eq!(results.len(), 3);
		assert!(results[0].is_provisioned());
		assert!(!results[1].is_provisioned());
		assert!(results[2].is_provisioned());
		assert_eq!(results[1].node.address(), "10.0.0.2");
	}

	#[tokio::test(start_paused = true)]
	async fn test_timeout_is_indeterminate() {
		let mock = MockExecutor::new()
			.with_timeout(Duration::from_secs(900))
			.with_node_delay("upgrade-packages", "10.0.0.1", Duration::from_secs(3600));
		let result = pipeline(&mock, 1)
			.run_node(&nodes(1)[0], &CancellationToken::new())
			.await;
		let err = result.result.unwrap_err();
		assert!(err.is_indeterminate());
		assert_eq!(err.step(), Some("upgrade-packages"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_parallelism_is_bounded() {
		let mock = MockExecutor::new().with_delay(Duration::from_secs(5));
		let results = pipeline(&mock, 2)
			.run_all(&nodes(6), &CancellationToken::new())
			.await;
		assert!(results.iter().all(NodeProvision::is_provisioned));
		assert_eq!(mock.peak_concurrency(), 2);
	}

	#[tokio::test]
	async fn test_cancelled_pipeline_issues_no_steps() {
		let mock = MockExecutor::new();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let results = pipeline(&mock, 4).run_all(&nodes(2), &cancel).await;
		assert_eq!(mock.call_count(), 0);
		assert!(results
			.iter()
			.all(|r| r.result.as_ref().unwrap_err().is_indeterminate()));
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_mid_run_stops_further_steps() {
		let mock =
			MockExecutor::new().with_node_delay(ANY_STEP, "10.0.0.1", Duration::from_secs(10));
		let cancel = CancellationToken::new();
		let trigger = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(15)).await;
			trigger.cancel();
		});
		let result = pipeline(&mock, 1).run_node(&nodes(1)[0], &cancel).await;
		assert_eq!(result.completed, vec!["disable-swap"]);
		assert_eq!(mock.call_count(), 2);
		assert!(result.result.unwrap_err().is_indeterminate());
	}
}
