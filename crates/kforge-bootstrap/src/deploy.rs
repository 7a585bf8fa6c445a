// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end deployment orchestration.
//!
//! Resolve the inventory, provision every node, bootstrap the control plane,
//! join the workers, verify, and record what happened to each node in a
//! [`RunReport`].

use std::sync::Arc;

use chrono::Utc;
use kforge_config::KforgeConfig;
use kforge_inventory::{
	normalize_address, HostProbe, InventoryError, InventoryResolver, InventorySpec, Node, NodeRole,
	SshIdentity,
};
use kforge_provision::{
	provisioning_steps, JoinToken, NodeProvision, PipelineError, ProvisioningPipeline, RemoteStep,
};
use kforge_remote::{BoundedPool, CancellationToken, RemoteError, RemoteExecutor, TaskOutcome};
use tracing::{info, instrument, warn};

use crate::controller::{join_worker_with, BootstrapController, WorkerJoin};
use crate::credential::JoinCredential;
use crate::error::{BootstrapError, DeployError};
use crate::report::{NodeOutcome, NodeReport, RunReport, Stage};
use crate::state::WorkerJoinState;
use crate::verify::{VerificationProbe, VerificationSummary, VerifyError};

const CANCELLED: &str = "run cancelled";

/// Result of resetting one node.
#[derive(Debug, Clone)]
pub struct ResetResult {
	pub address: String,
	pub error: Option<RemoteError>,
}

/// Owns the collaborators for a run and drives the deployment.
pub struct Deployer {
	config: KforgeConfig,
	executor: Arc<dyn RemoteExecutor>,
	probe: Arc<dyn HostProbe>,
}

impl Deployer {
	pub fn new(config: KforgeConfig, executor: Arc<dyn RemoteExecutor>, probe: Arc<dyn HostProbe>) -> Self {
		Self {
			config,
			executor,
			probe,
		}
	}

	pub fn config(&self) -> &KforgeConfig {
		&self.config
	}

	fn identity(&self) -> SshIdentity {
		SshIdentity::from_config(&self.config.ssh)
	}

	fn pipeline(&self) -> ProvisioningPipeline {
		ProvisioningPipeline::from_config(Arc::clone(&self.executor), &self.config)
	}

	/// Deploy a control plane and its workers.
	///
	/// Errors only when the inventory is invalid or unreachable under the
	/// configured policy; in that case no node has been touched. Every later
	/// failure is recorded per node in the report.
	#[instrument(skip_all, fields(control_plane = %spec.control_plane, workers = spec.workers.len()))]
	pub async fn deploy_cluster(
		&self,
		spec: &InventorySpec,
		cancel: &CancellationToken,
	) -> Result<RunReport, DeployError> {
		let mut report = RunReport::start();
		let resolver = InventoryResolver::new(
			self.identity(),
			Arc::clone(&self.probe),
			self.config.orchestration.probe_timeout(),
		);
		let resolved = resolver.resolve(spec).await?;
		let (inventory, unreachable) = resolved.into_reachable(self.config.orchestration.allow_partial_inventory)?;
		info!(run_id = %report.run_id, nodes = inventory.len(), "starting cluster deployment");

		let nodes: Vec<Node> = inventory.nodes().cloned().collect();
		let mut provisions = self.pipeline().run_all(&nodes, cancel).await.into_iter();
		let Some(cp_provision) = provisions.next() else {
			return Ok(report.finish());
		};

		let mut ready_workers = Vec::new();
		for provision in provisions {
			if provision.is_provisioned() {
				ready_workers.push(provision.node);
			} else {
				report.workers.push(provision_report(&provision));
			}
		}
		let skipped_unreachable: Vec<NodeReport> = unreachable
			.iter()
			.map(|u| NodeReport::skipped(&u.address, NodeRole::Worker, None, format!("unreachable: {}", u.reason)))
			.collect();

		if !cp_provision.is_provisioned() {
			report.control_plane = Some(provision_report(&cp_provision));
			skip_all(&mut report.workers, &ready_workers, Stage::Provisioned, "control plane not provisioned");
			report.workers.extend(skipped_unreachable);
			report.abort(if cancel.is_cancelled() {
				CANCELLED
			} else {
				"control plane provisioning failed"
			});
			sort_workers(&mut report, spec);
			return Ok(report.finish());
		}

		let controller = Arc::new(BootstrapController::new(
			Arc::clone(&self.executor),
			cp_provision.node.clone(),
			&self.config,
		));
		let (cp_report, credential) = self.bootstrap(&controller, cancel).await;
		report.control_plane = Some(cp_report);
		if credential.is_none() {
			skip_all(&mut report.workers, &ready_workers, Stage::Provisioned, "control plane not bootstrapped");
			report.workers.extend(skipped_unreachable);
			report.abort(if cancel.is_cancelled() {
				CANCELLED
			} else {
				"control plane bootstrap failed"
			});
			sort_workers(&mut report, spec);
			return Ok(report.finish());
		}

		if cancel.is_cancelled() {
			skip_all(&mut report.workers, &ready_workers, Stage::Provisioned, CANCELLED);
		} else {
			let joins = controller.join_workers(&ready_workers, cancel).await?;
			report.workers.extend(joins.iter().map(join_report));
		}
		report.workers.extend(skipped_unreachable);

		let expected: Vec<String> = report
			.nodes()
			.filter(|n| n.outcome.is_succeeded())
			.map(|n| n.address.clone())
			.collect();
		self.verify_into(&mut report, controller.control_plane().clone(), &expected, cancel)
			.await;

		if cancel.is_cancelled() {
			report.abort(CANCELLED);
		}
		sort_workers(&mut report, spec);
		info!(exit_code = report.exit_code(), "cluster deployment finished");
		Ok(report.finish())
	}

	/// Deploy a single control-plane node and return the credential workers
	/// need to join it.
	#[instrument(skip_all, fields(address = %address))]
	pub async fn deploy_control_plane(
		&self,
		address: &str,
		cancel: &CancellationToken,
	) -> Result<(RunReport, Option<JoinCredential>), DeployError> {
		let mut report = RunReport::start();
		let node = self.single_node(NodeRole::ControlPlane, address).await?;

		let provision = self.pipeline().run_node(&node, cancel).await;
		if !provision.is_provisioned() {
			report.control_plane = Some(provision_report(&provision));
			report.abort(if cancel.is_cancelled() {
				CANCELLED
			} else {
				"control plane provisioning failed"
			});
			return Ok((report.finish(), None));
		}

		let controller = Arc::new(BootstrapController::new(Arc::clone(&self.executor), node.clone(), &self.config));
		let (cp_report, credential) = self.bootstrap(&controller, cancel).await;
		report.control_plane = Some(cp_report);
		let Some(credential) = credential else {
			report.abort(if cancel.is_cancelled() {
				CANCELLED
			} else {
				"control plane bootstrap failed"
			});
			return Ok((report.finish(), None));
		};

		self.verify_into(&mut report, node.clone(), &[node.address().to_string()], cancel)
			.await;
		if cancel.is_cancelled() {
			report.abort(CANCELLED);
		}
		Ok((report.finish(), Some(JoinCredential::clone(&credential))))
	}

	/// Provision a single worker and join it with an operator-supplied
	/// credential.
	#[instrument(skip_all, fields(address = %address))]
	pub async fn deploy_worker(
		&self,
		address: &str,
		credential: Option<JoinCredential>,
		cancel: &CancellationToken,
	) -> Result<RunReport, DeployError> {
		let credential = credential.ok_or(DeployError::MissingCredential)?;
		credential.ensure_valid(Utc::now())?;

		let mut report = RunReport::start();
		let node = self.single_node(NodeRole::Worker, address).await?;

		let provision = self.pipeline().run_node(&node, cancel).await;
		if !provision.is_provisioned() {
			report.workers.push(provision_report(&provision));
			if cancel.is_cancelled() {
				report.abort(CANCELLED);
			}
			return Ok(report.finish());
		}

		let join = join_worker_with(
			self.executor.as_ref(),
			&self.config.cluster,
			&node,
			&credential,
			cancel,
		)
		.await;
		report.workers.push(join_report(&join));
		if cancel.is_cancelled() {
			report.abort(CANCELLED);
		}
		Ok(report.finish())
	}

	/// Poll the control plane until `expected` nodes are Ready.
	pub async fn verify(
		&self,
		control_plane: &str,
		expected: &[String],
		cancel: &CancellationToken,
	) -> Result<VerificationSummary, DeployError> {
		let node = Node::new(
			NodeRole::ControlPlane,
			normalize_address(control_plane)?,
			Arc::new(self.identity()),
		);
		let mut expected = expected
			.iter()
			.map(|e| normalize_address(e))
			.collect::<Result<Vec<_>, _>>()?;
		if expected.is_empty() {
			expected.push(node.address().to_string());
		}
		let probe = VerificationProbe::from_config(Arc::clone(&self.executor), node, &self.config.verify);
		let result = probe.wait_until_ready(&expected, cancel).await;
		Ok(VerificationSummary::from_result(&result, &expected))
	}

	/// Run `kubeadm reset` and clear kforge's markers on each address.
	#[instrument(skip_all, fields(nodes = addresses.len()))]
	pub async fn reset(
		&self,
		addresses: &[String],
		cancel: &CancellationToken,
	) -> Result<Vec<ResetResult>, DeployError> {
		let identity = Arc::new(self.identity());
		// Role is irrelevant to reset.
		let nodes = addresses
			.iter()
			.map(|a| normalize_address(a).map(|address| Node::new(NodeRole::Worker, address, Arc::clone(&identity))))
			.collect::<Result<Vec<_>, InventoryError>>()?;

		let pool = BoundedPool::new(self.config.orchestration.max_parallel);
		let outcomes = pool
			.run(nodes.clone(), |node| {
				let executor = Arc::clone(&self.executor);
				let cancel = cancel.clone();
				async move {
					let result = executor.run(&node, &RemoteStep::ResetNode.render(), &cancel).await;
					match &result {
						Ok(_) => info!(address = node.address(), "node reset"),
						Err(e) => warn!(address = node.address(), error = %e, "node reset failed"),
					}
					result.err()
				}
			})
			.await;

		Ok(outcomes
			.into_iter()
			.zip(nodes)
			.map(|(outcome, node)| ResetResult {
				address: node.address().to_string(),
				error: match outcome {
					TaskOutcome::Completed(error) => error,
					TaskOutcome::Panicked(message) => Some(RemoteError::Spawn { message }),
				},
			})
			.collect())
	}

	async fn single_node(&self, role: NodeRole, address: &str) -> Result<Node, DeployError> {
		let address = normalize_address(address)?;
		let identity = self.identity();
		if let Err(reason) = self
			.probe
			.probe(&address, identity.port, self.config.orchestration.probe_timeout())
			.await
		{
			return Err(InventoryError::UnreachableHost { role, address, reason }.into());
		}
		Ok(Node::new(role, address, Arc::new(identity)))
	}

	/// Drive the controller from init to credential issuance. Returns the
	/// control-plane report and the credential when every step succeeded.
	async fn bootstrap(
		&self,
		controller: &BootstrapController,
		cancel: &CancellationToken,
	) -> (NodeReport, Option<Arc<JoinCredential>>) {
		let address = controller.control_plane().address().to_string();
		let report = |stage: Stage, outcome: NodeOutcome| {
			NodeReport::new(address.clone(), NodeRole::ControlPlane, Some(stage), outcome)
		};

		if cancel.is_cancelled() {
			return (
				report(
					Stage::Provisioned,
					NodeOutcome::Skipped {
						reason: CANCELLED.to_string(),
					},
				),
				None,
			);
		}
		if let Err(e) = controller.init_control_plane(cancel).await {
			return (report(Stage::Provisioned, bootstrap_outcome(&e)), None);
		}
		controller.configure_kubeconfig(cancel).await;

		if let Err(e) = controller.install_network_plugin(cancel).await {
			// A cancelled grace wait still means the manifest was applied.
			let stage = if matches!(e, BootstrapError::Cancelled) {
				Stage::NetworkPluginInstalled
			} else {
				Stage::Initialized
			};
			return (report(stage, bootstrap_outcome(&e)), None);
		}

		match controller.issue_credential(cancel).await {
			Ok(credential) => (report(Stage::CredentialIssued, NodeOutcome::Succeeded), Some(credential)),
			Err(e) => (report(Stage::NetworkPluginInstalled, bootstrap_outcome(&e)), None),
		}
	}

	async fn verify_into(
		&self,
		report: &mut RunReport,
		control_plane: Node,
		expected: &[String],
		cancel: &CancellationToken,
	) {
		if expected.is_empty() || cancel.is_cancelled() {
			return;
		}
		let probe = VerificationProbe::from_config(Arc::clone(&self.executor), control_plane, &self.config.verify);
		let result = probe.wait_until_ready(expected, cancel).await;
		if let Err(VerifyError::VerificationTimeout { after, .. }) = &result {
			warn!(after_secs = after.as_secs(), "cluster not fully ready; continuing");
		}
		report.apply_verification(VerificationSummary::from_result(&result, expected));
	}
}

/// Every step a node of `role` would run, with placeholders where the real
/// values are only known during a run.
pub fn plan_steps(role: NodeRole, config: &KforgeConfig) -> Vec<RemoteStep> {
	let mut steps = provisioning_steps(config);
	match role {
		NodeRole::ControlPlane => {
			steps.push(RemoteStep::init_control_plane("<advertise-address>", &config.cluster));
			steps.push(RemoteStep::ConfigureKubeconfig {
				user: config.ssh.user.clone(),
			});
			steps.push(RemoteStep::InstallNetworkPlugin {
				manifest: config.cluster.network_plugin_manifest.clone(),
			});
			steps.push(RemoteStep::IssueJoinCredential {
				ttl_hours: config.cluster.token_ttl_hours,
			});
		}
		NodeRole::Worker => {
			steps.push(RemoteStep::JoinWorker {
				endpoint: format!("<control-plane>:{}", config.cluster.api_server_port),
				token: JoinToken::new("<token>"),
				ca_cert_hash: "<ca-cert-hash>".to_string(),
				ignore_preflight_errors: config.cluster.ignore_preflight_errors.clone(),
			});
		}
	}
	steps
}

fn provision_report(provision: &NodeProvision) -> NodeReport {
	let last_stage = match (provision.is_provisioned(), provision.last_completed()) {
		(true, _) => Stage::Provisioned,
		(false, Some(step)) => Stage::Provisioning(step.to_string()),
		(false, None) => Stage::Resolved,
	};
	let outcome = match &provision.result {
		Ok(()) => NodeOutcome::Succeeded,
		Err(PipelineError::StepFailed {
			source: RemoteError::Cancelled,
			..
		}) if provision.completed.is_empty() => NodeOutcome::Skipped {
			reason: CANCELLED.to_string(),
		},
		Err(e) if e.is_indeterminate() => NodeOutcome::Unknown { reason: e.to_string() },
		Err(e) => NodeOutcome::Failed { error: e.to_string() },
	};
	NodeReport::new(provision.node.address(), provision.node.role(), Some(last_stage), outcome)
}

fn join_report(join: &WorkerJoin) -> NodeReport {
	let (stage, outcome) = match (&join.state, &join.error) {
		(WorkerJoinState::Joined, _) => (Stage::Joined, NodeOutcome::Succeeded),
		(_, Some(e @ BootstrapError::CredentialExpired { .. })) => {
			(Stage::Provisioned, NodeOutcome::Failed { error: e.to_string() })
		}
		(WorkerJoinState::Unknown, e) => (
			Stage::JoinRequested,
			NodeOutcome::Unknown {
				reason: e.as_ref().map_or_else(|| "join outcome unknown".to_string(), ToString::to_string),
			},
		),
		(_, e) => (
			Stage::JoinRequested,
			NodeOutcome::Failed {
				error: e.as_ref().map_or_else(|| "join failed".to_string(), ToString::to_string),
			},
		),
	};
	NodeReport::new(join.node.address(), NodeRole::Worker, Some(stage), outcome)
}

fn bootstrap_outcome(error: &BootstrapError) -> NodeOutcome {
	if error.is_indeterminate() {
		NodeOutcome::Unknown {
			reason: error.to_string(),
		}
	} else {
		NodeOutcome::Failed {
			error: error.to_string(),
		}
	}
}

/// Restore inventory order; unknown addresses sort last.
fn sort_workers(report: &mut RunReport, spec: &InventorySpec) {
	let order: Vec<String> = spec
		.workers
		.iter()
		.filter_map(|w| normalize_address(w).ok())
		.collect();
	report
		.workers
		.sort_by_key(|r| order.iter().position(|a| *a == r.address).unwrap_or(usize::MAX));
}

fn skip_all(reports: &mut Vec<NodeReport>, nodes: &[Node], stage: Stage, reason: &str) {
	reports.extend(
		nodes
			.iter()
			.map(|n| NodeReport::skipped(n.address(), n.role(), Some(stage.clone()), reason)),
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use kforge_inventory::MockProbe;
	use kforge_remote::MockExecutor;

	#[test]
	fn test_plan_steps_per_role() {
		let config = KforgeConfig::default();
		let cp: Vec<&str> = plan_steps(NodeRole::ControlPlane, &config)
			.iter()
			.map(RemoteStep::name)
			.collect();
		assert_eq!(cp.first(), Some(&"disable-swap"));
		assert!(cp.ends_with(&[
			"init-control-plane",
			"configure-kubeconfig",
			"install-network-plugin",
			"issue-join-credential"
		]));

		let worker = plan_steps(NodeRole::Worker, &config);
		assert_eq!(worker.len(), 8);
		assert_eq!(worker.last().map(RemoteStep::name), Some("join-worker"));
		assert!(worker.iter().all(|s| s.name() != "init-control-plane"));
	}

	#[test]
	fn test_cancelled_before_any_step_is_skipped() {
		let node = Node::new(NodeRole::Worker, "10.0.0.2", Arc::new(SshIdentity::agent("ubuntu")));
		let provision = NodeProvision {
			node: node.clone(),
			completed: vec![],
			result: Err(PipelineError::StepFailed {
				step: "disable-swap",
				source: RemoteError::Cancelled,
			}),
		};
		assert!(matches!(provision_report(&provision).outcome, NodeOutcome::Skipped { .. }));

		let mid_flight = NodeProvision {
			completed: vec!["disable-swap"],
			..provision
		};
		let report = provision_report(&mid_flight);
		assert!(matches!(report.outcome, NodeOutcome::Unknown { .. }));
		assert_eq!(report.last_stage, Some(Stage::Provisioning("disable-swap".to_string())));
	}

	#[tokio::test]
	async fn test_worker_requires_credential() {
		let mock = MockExecutor::new();
		let probe = MockProbe::new();
		let deployer = Deployer::new(KforgeConfig::default(), Arc::new(mock.clone()), Arc::new(probe.clone()));
		let result = deployer
			.deploy_worker("10.0.0.2", None, &CancellationToken::new())
			.await;
		assert!(matches!(result, Err(DeployError::MissingCredential)));
		assert_eq!(mock.call_count(), 0);
		assert!(probe.get_calls().is_empty());
	}

	#[tokio::test]
	async fn test_reset_reports_each_node() {
		let mock = MockExecutor::new().with_node_error(
			"reset-node",
			"10.0.0.3",
			RemoteError::RemoteExecution {
				exit_code: 1,
				stderr: "kubeadm not found".to_string(),
			},
		);
		let deployer = Deployer::new(KforgeConfig::default(), Arc::new(mock.clone()), Arc::new(MockProbe::new()));
		let results = deployer
			.reset(
				&["10.0.0.2".to_string(), "10.0.0.3".to_string()],
				&CancellationToken::new(),
			)
			.await
			.unwrap();
		assert!(results[0].error.is_none());
		assert!(results[1].error.is_some());
		assert_eq!(mock.count_step("reset-node"), 2);
	}
}
