// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote execution for kforge.
//!
//! [`RemoteExecutor`] runs a rendered [`RemoteScript`] on a [`Node`] and
//! reports what happened without retrying. [`SshExecutor`] drives the system
//! ssh client; [`MockExecutor`] replays scripted responses. [`BoundedPool`]
//! fans work out across nodes with a concurrency limit.
//!
//! [`Node`]: kforge_inventory::Node

pub mod error;
pub mod executor;
pub mod mock;
pub mod pool;
pub mod ssh;

pub use error::{ConnectionKind, RemoteError};
pub use executor::{ExecOutput, RemoteExecutor, RemoteScript};
pub use mock::{MockCall, MockExecutor, ANY_STEP};
pub use pool::{BoundedPool, TaskOutcome};
pub use ssh::SshExecutor;
pub use tokio_util::sync::CancellationToken;
