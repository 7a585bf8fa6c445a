// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end deployment scenarios against the mock executor and probe.
//!
//! Tests cover:
//! - Partial worker join with one timeout
//! - Inventory rejection before any network activity
//! - Executor timeouts during provisioning
//! - Control-plane init failure
//! - Unreachable workers with and without partial inventory
//! - Cancellation mid-run

use std::sync::Arc;
use std::time::Duration;

use kforge_bootstrap::{Deployer, DeployError, NodeOutcome, RunReport, Stage};
use kforge_config::KforgeConfig;
use kforge_inventory::{InventoryError, InventorySpec, MockProbe};
use kforge_remote::{CancellationToken, MockExecutor, RemoteError};

const JOIN_OUTPUT: &str = "kubeadm join 10.0.0.1:6443 --token abcdef.0123456789abcdef \
	--discovery-token-ca-cert-hash sha256:1f3d0c1a9b6a5f1e2d3c4b5a69788796a5b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0\n";

fn node_list(ready: &[(&str, &str)]) -> String {
	let items: Vec<serde_json::Value> = ready
		.iter()
		.map(|(name, address)| {
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "Node",
				"metadata": { "name": name },
				"status": {
					"addresses": [{ "type": "InternalIP", "address": address }],
					"conditions": [{
						"type": "Ready",
						"status": "True",
						"lastHeartbeatTime": "2025-06-01T12:00:00Z"
					}]
				}
			})
		})
		.collect();
	serde_json::json!({ "apiVersion": "v1", "kind": "List", "items": items }).to_string()
}

fn spec(workers: &[&str]) -> InventorySpec {
	InventorySpec::new("10.0.0.1", workers.iter().map(|w| w.to_string()).collect())
}

fn deployer(mock: &MockExecutor, probe: &MockProbe, config: KforgeConfig) -> Deployer {
	Deployer::new(config, Arc::new(mock.clone()), Arc::new(probe.clone()))
}

fn healthy_mock() -> MockExecutor {
	MockExecutor::new()
		.with_output("issue-join-credential", JOIN_OUTPUT)
		.with_output(
			"list-nodes",
			node_list(&[
				("cp", "10.0.0.1"),
				("w2", "10.0.0.2"),
				("w3", "10.0.0.3"),
				("w4", "10.0.0.4"),
			]),
		)
		.with_timeout(Duration::from_secs(600))
}

fn worker<'a>(report: &'a RunReport, address: &str) -> &'a kforge_bootstrap::NodeReport {
	report
		.workers
		.iter()
		.find(|w| w.address == address)
		.unwrap_or_else(|| panic!("no report for {address}"))
}

#[tokio::test(start_paused = true)]
async fn two_of_three_workers_join_and_one_times_out() {
	let mock = healthy_mock()
		.with_output("list-nodes", node_list(&[("cp", "10.0.0.1"), ("w2", "10.0.0.2"), ("w3", "10.0.0.3")]))
		.with_node_delay("join-worker", "10.0.0.4", Duration::from_secs(3600));
	let probe = MockProbe::new();

	let report = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3", "10.0.0.4"]), &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(report.exit_code(), 2);
	assert!(report.aborted.is_none());

	let cp = report.control_plane.as_ref().unwrap();
	assert_eq!(cp.outcome, NodeOutcome::Succeeded);
	assert_eq!(cp.last_stage, Some(Stage::Ready));

	assert_eq!(worker(&report, "10.0.0.2").last_stage, Some(Stage::Ready));
	assert_eq!(worker(&report, "10.0.0.3").last_stage, Some(Stage::Ready));
	let timed_out = worker(&report, "10.0.0.4");
	assert!(matches!(timed_out.outcome, NodeOutcome::Unknown { .. }));
	assert_eq!(timed_out.last_stage, Some(Stage::JoinRequested));

	let verification = report.verification.as_ref().unwrap();
	assert!(!verification.timed_out);
	assert_eq!(mock.count_step("init-control-plane"), 1);
	assert_eq!(mock.count_step("issue-join-credential"), 1);
	assert_eq!(mock.count_step("join-worker"), 3);

	let addresses: Vec<&str> = report.workers.iter().map(|w| w.address.as_str()).collect();
	assert_eq!(addresses, vec!["10.0.0.2", "10.0.0.3", "10.0.0.4"]);
}

#[tokio::test]
async fn control_plane_listed_as_worker_is_rejected_before_any_contact() {
	let mock = healthy_mock();
	let probe = MockProbe::new();

	let result = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", " 10.0.0.1 "]), &CancellationToken::new())
		.await;

	assert!(matches!(
		result,
		Err(DeployError::Inventory(InventoryError::InvalidInventory { .. }))
	));
	assert_eq!(mock.call_count(), 0);
	assert!(probe.get_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn executor_timeout_during_provisioning_marks_node_unknown() {
	let mock = healthy_mock().with_node_delay(
		"install-container-runtime",
		"10.0.0.3",
		Duration::from_secs(3600),
	);
	let probe = MockProbe::new();

	let report = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3"]), &CancellationToken::new())
		.await
		.unwrap();

	let stuck = worker(&report, "10.0.0.3");
	assert!(matches!(stuck.outcome, NodeOutcome::Unknown { .. }));
	assert_eq!(
		stuck.last_stage,
		Some(Stage::Provisioning("install-base-dependencies".to_string()))
	);
	// Nothing after the stuck step ran on that node.
	let steps = mock.steps_for("10.0.0.3");
	assert_eq!(steps.last().map(String::as_str), Some("install-container-runtime"));
	assert!(!steps.iter().any(|s| s == "join-worker"));

	assert_eq!(worker(&report, "10.0.0.2").outcome, NodeOutcome::Succeeded);
	assert_eq!(report.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn init_failure_is_fatal_and_skips_workers() {
	let mock = healthy_mock().with_error(
		"init-control-plane",
		RemoteError::RemoteExecution {
			exit_code: 1,
			stderr: "[ERROR CRI]: container runtime is not running".to_string(),
		},
	);
	let probe = MockProbe::new();

	let report = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3"]), &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(report.exit_code(), 1);
	let cp = report.control_plane.as_ref().unwrap();
	assert!(matches!(cp.outcome, NodeOutcome::Failed { .. }));
	assert_eq!(cp.last_stage, Some(Stage::Provisioned));
	assert!(report
		.workers
		.iter()
		.all(|w| matches!(w.outcome, NodeOutcome::Skipped { .. })));
	assert_eq!(mock.count_step("join-worker"), 0);
	assert_eq!(mock.count_step("issue-join-credential"), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_worker_aborts_unless_partial_inventory_allowed() {
	let mock = healthy_mock();
	let probe = MockProbe::new().with_unreachable("10.0.0.3");

	let strict = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3"]), &CancellationToken::new())
		.await;
	assert!(matches!(
		strict,
		Err(DeployError::Inventory(InventoryError::UnreachableHost { .. }))
	));
	assert_eq!(mock.call_count(), 0);

	let mut config = KforgeConfig::default();
	config.orchestration.allow_partial_inventory = true;
	let report = deployer(&mock, &probe, config)
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3"]), &CancellationToken::new())
		.await
		.unwrap();

	let skipped = worker(&report, "10.0.0.3");
	assert!(matches!(skipped.outcome, NodeOutcome::Skipped { .. }));
	assert_eq!(skipped.last_stage, None);
	assert!(mock.steps_for("10.0.0.3").is_empty());
	assert_eq!(worker(&report, "10.0.0.2").last_stage, Some(Stage::Ready));
	assert_eq!(report.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn unreachable_control_plane_always_aborts() {
	let mock = healthy_mock();
	let probe = MockProbe::new().with_unreachable("10.0.0.1");
	let mut config = KforgeConfig::default();
	config.orchestration.allow_partial_inventory = true;

	let result = deployer(&mock, &probe, config)
		.deploy_cluster(&spec(&["10.0.0.2"]), &CancellationToken::new())
		.await;
	assert!(matches!(
		result,
		Err(DeployError::Inventory(InventoryError::UnreachableHost { .. }))
	));
	assert_eq!(mock.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_marks_in_flight_nodes_unknown() {
	let mock = healthy_mock().with_delay(Duration::from_secs(10));
	let probe = MockProbe::new();
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_secs(15)).await;
		trigger.cancel();
	});

	let report = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_cluster(&spec(&["10.0.0.2", "10.0.0.3"]), &cancel)
		.await
		.unwrap();

	assert_eq!(report.aborted.as_deref(), Some("run cancelled"));
	assert_eq!(report.exit_code(), 1);
	for node in report.nodes() {
		assert!(
			matches!(node.outcome, NodeOutcome::Unknown { .. }),
			"{} should be unknown, was {:?}",
			node.address,
			node.outcome
		);
		assert_eq!(node.last_stage, Some(Stage::Provisioning("disable-swap".to_string())));
	}
	assert_eq!(mock.count_step("init-control-plane"), 0);
}

#[tokio::test(start_paused = true)]
async fn single_control_plane_returns_credential() {
	let mock = healthy_mock();
	let probe = MockProbe::new();

	let (report, credential) = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_control_plane("10.0.0.1", &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(report.exit_code(), 0);
	let credential = credential.unwrap();
	assert_eq!(credential.endpoint, "10.0.0.1:6443");
	assert!(!format!("{report:?}").contains("0123456789abcdef"));
}

#[tokio::test(start_paused = true)]
async fn single_worker_joins_with_supplied_credential() {
	let mock = healthy_mock();
	let probe = MockProbe::new();
	let credential = JOIN_OUTPUT.parse().unwrap();

	let report = deployer(&mock, &probe, KforgeConfig::default())
		.deploy_worker("10.0.0.2", Some(credential), &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(report.exit_code(), 0);
	assert!(report.control_plane.is_none());
	assert_eq!(report.workers[0].last_stage, Some(Stage::Joined));
	let join = mock
		.get_calls()
		.into_iter()
		.find(|c| c.step == "join-worker")
		.unwrap();
	assert!(join.body.contains("abcdef.0123456789abcdef"));
}
