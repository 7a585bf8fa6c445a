// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Liveness probes run against every address before any remote mutation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Checks that a host accepts connections on its SSH port.
#[async_trait]
pub trait HostProbe: Send + Sync {
	/// Returns `Err(reason)` when the host cannot be reached within `timeout`.
	async fn probe(&self, address: &str, port: u16, timeout: Duration) -> Result<(), String>;
}

/// Probe that opens (and immediately drops) a TCP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl HostProbe for TcpProbe {
	async fn probe(&self, address: &str, port: u16, timeout: Duration) -> Result<(), String> {
		trace!(address, port, "probing host");
		match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
			Ok(Ok(_stream)) => {
				debug!(address, port, "host reachable");
				Ok(())
			}
			Ok(Err(e)) => Err(format!("connect to port {port} failed: {e}")),
			Err(_) => Err(format!(
				"no answer on port {port} within {}s",
				timeout.as_secs()
			)),
		}
	}
}

/// Probe with a fixed set of unreachable addresses, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
	unreachable: HashSet<String>,
	calls: Arc<Mutex<Vec<String>>>,
}

impl MockProbe {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_unreachable(mut self, address: impl Into<String>) -> Self {
		self.unreachable.insert(address.into());
		self
	}

	/// Addresses probed so far, in call order.
	pub fn get_calls(&self) -> Vec<String> {
		self.calls.lock().unwrap().clone()
	}
}

#[async_trait]
impl HostProbe for MockProbe {
	async fn probe(&self, address: &str, _port: u16, _timeout: Duration) -> Result<(), String> {
		self.calls.lock().unwrap().push(address.to_string());
		if self.unreachable.contains(address) {
			Err("connection refused".to_string())
		} else {
			Ok(())
		}
	}
}
