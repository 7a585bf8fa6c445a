// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster bootstrap for kforge.
//!
//! The [`BootstrapController`] takes a provisioned control plane through
//! `kubeadm init`, the pod network and join credential issuance, then fans
//! the credential out to workers. [`VerificationProbe`] waits for the nodes
//! to report Ready and [`Deployer`] ties the whole run together into a
//! [`RunReport`].

pub mod controller;
pub mod credential;
pub mod deploy;
pub mod error;
pub mod report;
pub mod state;
pub mod verify;

pub use controller::{join_worker_with, BootstrapController, InitOutcome, WorkerJoin};
pub use credential::{JoinCredential, DEFAULT_TTL};
pub use deploy::{plan_steps, Deployer, ResetResult};
pub use error::{BootstrapError, BootstrapResult, DeployError};
pub use report::{NodeOutcome, NodeReport, RunReport, Stage};
pub use state::{ControllerState, WorkerJoinState};
pub use verify::{parse_node_list, NodeStatus, VerificationProbe, VerificationSummary, VerifyError};
