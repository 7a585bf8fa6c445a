// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control-plane bootstrap and worker joins.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use kforge_config::{ClusterConfig, KforgeConfig, TokenPolicy};
use kforge_inventory::Node;
use kforge_provision::{RemoteStep, ALREADY_INITIALIZED, ALREADY_JOINED, INIT_LOCK_HELD_EXIT};
use kforge_remote::{BoundedPool, CancellationToken, RemoteExecutor, TaskOutcome};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::credential::JoinCredential;
use crate::error::{BootstrapError, BootstrapResult};
use crate::state::{ControllerState, WorkerJoinState};

/// How `init_control_plane` found the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
	Initialized,
	/// The remote init marker was already present; nothing was run.
	AlreadyInitialized,
}

/// Recorded result of the one allowed init attempt.
#[derive(Debug, Clone)]
enum InitRecord {
	NotStarted,
	Succeeded(InitOutcome),
	Failed(BootstrapError),
}

/// Result of one worker's join.
#[derive(Debug, Clone)]
pub struct WorkerJoin {
	pub node: Node,
	pub state: WorkerJoinState,
	pub error: Option<BootstrapError>,
	/// The node already had a kubelet config; join was a no-op.
	pub already_joined: bool,
}

impl WorkerJoin {
	pub fn is_joined(&self) -> bool {
		self.state == WorkerJoinState::Joined
	}
}

/// Drives the control-plane state machine and fans joins out to workers.
pub struct BootstrapController {
	executor: Arc<dyn RemoteExecutor>,
	control_plane: Node,
	cluster: ClusterConfig,
	kubeconfig_user: String,
	network_plugin_grace: Duration,
	pool: BoundedPool,
	state: StdMutex<ControllerState>,
	init: Mutex<InitRecord>,
	credential: Mutex<Option<Arc<JoinCredential>>>,
}

impl BootstrapController {
	pub fn new(executor: Arc<dyn RemoteExecutor>, control_plane: Node, config: &KforgeConfig) -> Self {
		Self {
			executor,
			control_plane,
			cluster: config.cluster.clone(),
			kubeconfig_user: config.ssh.user.clone(),
			network_plugin_grace: config.orchestration.network_plugin_grace(),
			pool: BoundedPool::new(config.orchestration.max_parallel),
			state: StdMutex::new(ControllerState::Uninitialized),
			init: Mutex::new(InitRecord::NotStarted),
			credential: Mutex::new(None),
		}
	}

	pub fn control_plane(&self) -> &Node {
		&self.control_plane
	}

	pub fn state(&self) -> ControllerState {
		*self.lock_state()
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, ControllerState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn transition(&self, to: ControllerState) -> BootstrapResult<()> {
		let mut state = self.lock_state();
		let from = *state;
		state.transition(to)?;
		debug!(%from, %to, "control-plane state changed");
		Ok(())
	}

	/// Run `kubeadm init` on the control plane exactly once.
	///
	/// Concurrent callers are serialized; once an attempt has succeeded or
	/// failed every later caller gets the recorded result without another
	/// remote call. A failed init is never retried.
	#[instrument(skip_all, fields(address = self.control_plane.address()))]
	pub async fn init_control_plane(&self, cancel: &CancellationToken) -> BootstrapResult<InitOutcome> {
		let mut record = self.init.lock().await;
		match &*record {
			InitRecord::Succeeded(outcome) => return Ok(*outcome),
			InitRecord::Failed(e) => return Err(e.clone()),
			InitRecord::NotStarted => {}
		}

		self.transition(ControllerState::Initializing)?;
		let script =
			RemoteStep::init_control_plane(self.control_plane.address(), &self.cluster).render();

		match self.executor.run(&self.control_plane, &script, cancel).await {
			Ok(output) => {
				let outcome = if output.stdout.contains(ALREADY_INITIALIZED) {
					info!("control plane already initialized, skipping kubeadm init");
					InitOutcome::AlreadyInitialized
				} else {
					info!(
						duration_ms = output.duration.as_millis() as u64,
						"control plane initialized"
					);
					InitOutcome::Initialized
				};
				self.transition(ControllerState::Initialized)?;
				*record = InitRecord::Succeeded(outcome);
				Ok(outcome)
			}
			Err(source) => {
				let error = if source.exit_code() == Some(INIT_LOCK_HELD_EXIT) {
					BootstrapError::InitLockHeld {
						address: self.control_plane.address().to_string(),
					}
				} else {
					BootstrapError::InitFailed { source }
				};
				warn!(error = %error, "control plane init failed");
				self.transition(ControllerState::InitFailed)?;
				*record = InitRecord::Failed(error.clone());
				Err(error)
			}
		}
	}

	/// Install the admin kubeconfig for the SSH user. Failure is only logged.
	pub async fn configure_kubeconfig(&self, cancel: &CancellationToken) {
		let script = RemoteStep::ConfigureKubeconfig {
			user: self.kubeconfig_user.clone(),
		}
		.render();
		if let Err(e) = self.executor.run(&self.control_plane, &script, cancel).await {
			warn!(error = %e, user = %self.kubeconfig_user, "could not install kubeconfig for ssh user");
		}
	}

	/// Apply the pod network manifest, then wait out the grace period.
	///
	/// The wait is cancellable; after it the controller proceeds whether or
	/// not the plugin has settled.
	#[instrument(skip_all, fields(address = self.control_plane.address()))]
	pub async fn install_network_plugin(&self, cancel: &CancellationToken) -> BootstrapResult<()> {
		self.transition(ControllerState::NetworkPluginInstalling)?;
		let script = RemoteStep::InstallNetworkPlugin {
			manifest: self.cluster.network_plugin_manifest.clone(),
		}
		.render();
		self.executor
			.run(&self.control_plane, &script, cancel)
			.await
			.map_err(|source| BootstrapError::NetworkPlugin { source })?;

		info!(
			grace_secs = self.network_plugin_grace.as_secs(),
			"network plugin applied, waiting for it to settle"
		);
		tokio::select! {
			_ = tokio::time::sleep(self.network_plugin_grace) => Ok(()),
			_ = cancel.cancelled() => Err(BootstrapError::Cancelled),
		}
	}

	/// Issue a fresh join credential on the control plane.
	#[instrument(skip_all, fields(address = self.control_plane.address()))]
	pub async fn issue_credential(&self, cancel: &CancellationToken) -> BootstrapResult<Arc<JoinCredential>> {
		{
			let state = self.lock_state();
			if !state.can_transition_to(ControllerState::CredentialIssued) {
				return Err(BootstrapError::IllegalTransition {
					from: *state,
					to: ControllerState::CredentialIssued,
				});
			}
		}

		let ttl = Duration::from_secs(u64::from(self.cluster.token_ttl_hours) * 3600);
		let script = RemoteStep::IssueJoinCredential {
			ttl_hours: self.cluster.token_ttl_hours,
		}
		.render();
		let output = self
			.executor
			.run(&self.control_plane, &script, cancel)
			.await
			.map_err(|source| BootstrapError::CredentialIssue { source })?;

		let credential = Arc::new(JoinCredential::parse(&output.stdout, Utc::now(), ttl)?);
		self.transition(ControllerState::CredentialIssued)?;
		info!(
			endpoint = %credential.endpoint,
			token_id = credential.token.id(),
			expires_at = %credential.expires_at(),
			"join credential issued"
		);
		*self.credential.lock().await = Some(Arc::clone(&credential));
		Ok(credential)
	}

	/// The credential to use for the next join under the configured policy.
	async fn credential_for_join(&self, cancel: &CancellationToken) -> BootstrapResult<Arc<JoinCredential>> {
		match self.cluster.token_policy {
			TokenPolicy::IssueOnce => self
				.credential
				.lock()
				.await
				.clone()
				.ok_or(BootstrapError::CredentialNotIssued),
			TokenPolicy::PerWorker => {
				if self.credential.lock().await.is_none() {
					return Err(BootstrapError::CredentialNotIssued);
				}
				self.issue_credential(cancel).await
			}
		}
	}

	/// Join one worker with `credential`. Never fails the caller; the outcome
	/// is in the returned [`WorkerJoin`].
	#[instrument(skip_all, fields(address = worker.address()))]
	pub async fn join_worker(
		&self,
		worker: &Node,
		credential: &JoinCredential,
		cancel: &CancellationToken,
	) -> WorkerJoin {
		join_worker_with(self.executor.as_ref(), &self.cluster, worker, credential, cancel).await
	}

	/// Join every worker through the bounded pool. Each worker's result is
	/// independent of the others.
	///
	/// Fails only when no credential has been issued yet.
	#[instrument(skip_all, fields(workers = workers.len()))]
	pub async fn join_workers(
		self: &Arc<Self>,
		workers: &[Node],
		cancel: &CancellationToken,
	) -> BootstrapResult<Vec<WorkerJoin>> {
		if self.credential.lock().await.is_none() {
			return Err(BootstrapError::CredentialNotIssued);
		}

		let outcomes = self
			.pool
			.run(workers.to_vec(), |worker| {
				let controller = Arc::clone(self);
				let cancel = cancel.clone();
				async move {
					match controller.credential_for_join(&cancel).await {
						Ok(credential) => controller.join_worker(&worker, &credential, &cancel).await,
						Err(error) => {
							warn!(address = worker.address(), error = %error, "no credential for worker");
							WorkerJoin {
								state: if error.is_indeterminate() {
									WorkerJoinState::Unknown
								} else {
									WorkerJoinState::JoinFailed
								},
								node: worker,
								error: Some(error),
								already_joined: false,
							}
						}
					}
				}
			})
			.await;

		let joins: Vec<WorkerJoin> = outcomes
			.into_iter()
			.zip(workers)
			.map(|(outcome, worker)| match outcome {
				TaskOutcome::Completed(join) => join,
				TaskOutcome::Panicked(message) => WorkerJoin {
					node: worker.clone(),
					state: WorkerJoinState::JoinFailed,
					error: Some(BootstrapError::WorkerJoinFailed {
						node: worker.address().to_string(),
						source: kforge_remote::RemoteError::Spawn { message },
					}),
					already_joined: false,
				},
			})
			.collect();

		let joined = joins.iter().filter(|j| j.is_joined()).count();
		info!(joined, failed = joins.len() - joined, "worker joins finished");
		Ok(joins)
	}
}

/// Join a worker without a controller, for single-node worker deployments
/// where the credential comes from the operator.
pub async fn join_worker_with(
	executor: &dyn RemoteExecutor,
	cluster: &ClusterConfig,
	worker: &Node,
	credential: &JoinCredential,
	cancel: &CancellationToken,
) -> WorkerJoin {
	let mut state = WorkerJoinState::Pending;
	let finish = |state: WorkerJoinState, error: Option<BootstrapError>, already_joined: bool| {
		WorkerJoin {
			node: worker.clone(),
			state,
			error,
			already_joined,
		}
	};

	if let Err(error) = credential.ensure_valid(Utc::now()) {
		warn!(error = %error, "refusing to join with expired credential");
		if let Err(e) = state.transition(WorkerJoinState::JoinFailed) {
			return finish(state, Some(e), false);
		}
		return finish(state, Some(error), false);
	}

	if let Err(e) = state.transition(WorkerJoinState::JoinRequested) {
		return finish(state, Some(e), false);
	}
	let script = RemoteStep::JoinWorker {
		endpoint: credential.endpoint.clone(),
		token: credential.token.clone(),
		ca_cert_hash: credential.ca_cert_hash.clone(),
		ignore_preflight_errors: cluster.ignore_preflight_errors.clone(),
	}
	.render();

	let (next, error, already_joined) = match executor.run(worker, &script, cancel).await {
		Ok(output) => {
			let already_joined = output.stdout.contains(ALREADY_JOINED);
			info!(already_joined, "worker joined");
			(WorkerJoinState::Joined, None, already_joined)
		}
		Err(source) => {
			let next = if source.is_indeterminate() {
				WorkerJoinState::Unknown
			} else {
				WorkerJoinState::JoinFailed
			};
			warn!(error = %source, state = %next, "worker join did not complete");
			let error = BootstrapError::WorkerJoinFailed {
				node: worker.address().to_string(),
				source,
			};
			(next, Some(error), false)
		}
	};

	match state.transition(next) {
		Ok(()) => finish(state, error, already_joined),
		Err(e) => finish(state, Some(e), false),
	}
}
