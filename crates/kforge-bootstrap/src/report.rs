// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-node run report and exit status.

use std::fmt;

use chrono::{DateTime, Utc};
use kforge_inventory::NodeRole;
use serde::Serialize;
use uuid::Uuid;

use crate::verify::VerificationSummary;

/// Last stage a node completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "step")]
pub enum Stage {
	Resolved,
	/// Provisioning stopped after this step.
	Provisioning(String),
	Provisioned,
	Initialized,
	NetworkPluginInstalled,
	CredentialIssued,
	JoinRequested,
	Joined,
	Ready,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Stage::Resolved => f.write_str("resolved"),
			Stage::Provisioning(step) => write!(f, "provisioning({step})"),
			Stage::Provisioned => f.write_str("provisioned"),
			Stage::Initialized => f.write_str("initialized"),
			Stage::NetworkPluginInstalled => f.write_str("network-plugin-installed"),
			Stage::CredentialIssued => f.write_str("credential-issued"),
			Stage::JoinRequested => f.write_str("join-requested"),
			Stage::Joined => f.write_str("joined"),
			Stage::Ready => f.write_str("ready"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NodeOutcome {
	Succeeded,
	Failed { error: String },
	/// The node may have been changed; its state is not known.
	Unknown { reason: String },
	Skipped { reason: String },
}

impl NodeOutcome {
	pub fn is_succeeded(&self) -> bool {
		matches!(self, NodeOutcome::Succeeded)
	}

	pub fn label(&self) -> &'static str {
		match self {
			NodeOutcome::Succeeded => "succeeded",
			NodeOutcome::Failed { .. } => "failed",
			NodeOutcome::Unknown { .. } => "unknown",
			NodeOutcome::Skipped { .. } => "skipped",
		}
	}

	pub fn detail(&self) -> Option<&str> {
		match self {
			NodeOutcome::Succeeded => None,
			NodeOutcome::Failed { error } => Some(error),
			NodeOutcome::Unknown { reason } | NodeOutcome::Skipped { reason } => Some(reason),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
	pub address: String,
	pub role: NodeRole,
	/// `None` when the node never got past the liveness probe.
	pub last_stage: Option<Stage>,
	pub outcome: NodeOutcome,
}

impl NodeReport {
	pub fn new(address: impl Into<String>, role: NodeRole, last_stage: Option<Stage>, outcome: NodeOutcome) -> Self {
		Self {
			address: address.into(),
			role,
			last_stage,
			outcome,
		}
	}

	pub fn skipped(address: impl Into<String>, role: NodeRole, last_stage: Option<Stage>, reason: impl Into<String>) -> Self {
		Self::new(
			address,
			role,
			last_stage,
			NodeOutcome::Skipped {
				reason: reason.into(),
			},
		)
	}
}

/// Structured result of one deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
	pub run_id: Uuid,
	pub started_at: DateTime<Utc>,
	pub finished_at: Option<DateTime<Utc>>,
	/// `None` for worker-only runs.
	pub control_plane: Option<NodeReport>,
	pub workers: Vec<NodeReport>,
	pub verification: Option<VerificationSummary>,
	/// Why the run stopped early, if it did.
	pub aborted: Option<String>,
}

impl RunReport {
	pub fn start() -> Self {
		Self {
			run_id: Uuid::new_v4(),
			started_at: Utc::now(),
			finished_at: None,
			control_plane: None,
			workers: Vec::new(),
			verification: None,
			aborted: None,
		}
	}

	pub fn abort(&mut self, reason: impl Into<String>) {
		if self.aborted.is_none() {
			self.aborted = Some(reason.into());
		}
	}

	pub fn finish(mut self) -> Self {
		self.finished_at = Some(Utc::now());
		self
	}

	pub fn nodes(&self) -> impl Iterator<Item = &NodeReport> {
		self.control_plane.iter().chain(self.workers.iter())
	}

	/// Promote every succeeded node seen Ready to [`Stage::Ready`].
	pub fn apply_verification(&mut self, summary: VerificationSummary) {
		for node in self.control_plane.iter_mut().chain(self.workers.iter_mut()) {
			if node.outcome.is_succeeded() && summary.is_ready(&node.address) {
				node.last_stage = Some(Stage::Ready);
			}
		}
		self.verification = Some(summary);
	}

	/// Process exit status for this run.
	///
	/// `0` when every node succeeded, `2` when the control plane is usable but
	/// some workers are not, `1` when the control plane failed or the run was
	/// aborted. Worker-only runs use `1` for any failure. Verification
	/// timeouts do not change the status.
	pub fn exit_code(&self) -> i32 {
		if self.aborted.is_some() {
			return 1;
		}
		let workers_ok = self.workers.iter().all(|w| w.outcome.is_succeeded());
		match &self.control_plane {
			Some(cp) if !cp.outcome.is_succeeded() => 1,
			Some(_) if workers_ok => 0,
			Some(_) => 2,
			None if workers_ok && !self.workers.is_empty() => 0,
			None => 1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::verify::NodeStatus;

	fn ok(address: &str, role: NodeRole) -> NodeReport {
		NodeReport::new(address, role, Some(Stage::Joined), NodeOutcome::Succeeded)
	}

	fn failed(address: &str) -> NodeReport {
		NodeReport::new(
			address,
			NodeRole::Worker,
			Some(Stage::JoinRequested),
			NodeOutcome::Failed {
				error: "boom".to_string(),
			},
		)
	}

	fn report(cp: Option<NodeReport>, workers: Vec<NodeReport>) -> RunReport {
		RunReport {
			control_plane: cp,
			workers,
			..RunReport::start()
		}
	}

	#[test]
	fn test_exit_codes() {
		let cp = || Some(ok("10.0.0.1", NodeRole::ControlPlane));
		assert_eq!(report(cp(), vec![ok("10.0.0.2", NodeRole::Worker)]).exit_code(), 0);
		assert_eq!(
			report(cp(), vec![ok("10.0.0.2", NodeRole::Worker), failed("10.0.0.3")]).exit_code(),
			2
		);
		assert_eq!(
			report(
				cp(),
				vec![NodeReport::skipped("10.0.0.4", NodeRole::Worker, None, "unreachable")]
			)
			.exit_code(),
			2
		);

		let mut cp_failed = ok("10.0.0.1", NodeRole::ControlPlane);
		cp_failed.outcome = NodeOutcome::Failed {
			error: "init".to_string(),
		};
		assert_eq!(report(Some(cp_failed), vec![]).exit_code(), 1);

		let mut aborted = report(cp(), vec![ok("10.0.0.2", NodeRole::Worker)]);
		aborted.abort("run cancelled");
		assert_eq!(aborted.exit_code(), 1);
	}

	#[test]
	fn test_worker_only_exit_codes() {
		assert_eq!(report(None, vec![ok("10.0.0.2", NodeRole::Worker)]).exit_code(), 0);
		assert_eq!(report(None, vec![failed("10.0.0.2")]).exit_code(), 1);
	}

	#[test]
	fn test_first_abort_reason_wins() {
		let mut r = report(None, vec![]);
		r.abort("control plane init failed");
		r.abort("run cancelled");
		assert_eq!(r.aborted.as_deref(), Some("control plane init failed"));
	}

	#[test]
	fn test_verification_promotes_ready_nodes_only() {
		let mut r = report(
			Some(ok("10.0.0.1", NodeRole::ControlPlane)),
			vec![ok("10.0.0.2", NodeRole::Worker), failed("10.0.0.3")],
		);
		let status = |name: &str, address: &str| NodeStatus {
			node_name: name.to_string(),
			addresses: vec![address.to_string()],
			ready: true,
			last_seen: None,
		};
		r.apply_verification(VerificationSummary {
			timed_out: false,
			not_ready: vec![],
			nodes: vec![status("cp", "10.0.0.1"), status("w2", "10.0.0.3")],
		});
		assert_eq!(r.control_plane.as_ref().and_then(|c| c.last_stage.clone()), Some(Stage::Ready));
		assert_eq!(r.workers[0].last_stage, Some(Stage::Joined));
		assert_eq!(r.workers[1].last_stage, Some(Stage::JoinRequested));
	}

	#[test]
	fn test_json_shape() {
		let r = report(
			Some(NodeReport::new(
				"10.0.0.1",
				NodeRole::ControlPlane,
				Some(Stage::Provisioning("disable-swap".to_string())),
				NodeOutcome::Unknown {
					reason: "timed out".to_string(),
				},
			)),
			vec![],
		);
		let json = serde_json::to_value(&r).unwrap();
		let cp = &json["control_plane"];
		assert_eq!(cp["role"], "control-plane");
		assert_eq!(cp["last_stage"]["stage"], "provisioning");
		assert_eq!(cp["last_stage"]["step"], "disable-swap");
		assert_eq!(cp["outcome"]["status"], "unknown");
	}
}
