// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scripted executor for tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kforge_inventory::Node;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::executor::{ExecOutput, RemoteExecutor, RemoteScript};

/// Matches every step name.
pub const ANY_STEP: &str = "*";

/// Recorded call to the mock executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockCall {
	pub address: String,
	pub step: String,
	pub body: String,
}

#[derive(Clone, Debug)]
struct Rule {
	step: String,
	address: Option<String>,
	result: Option<Result<ExecOutput, RemoteError>>,
	delay: Option<Duration>,
}

impl Rule {
	/// Higher is more specific; `None` when the rule does not apply.
	fn score(&self, address: &str, step: &str) -> Option<u8> {
		let step_score = if self.step == step {
			1
		} else if self.step == ANY_STEP {
			0
		} else {
			return None;
		};
		let address_score = match &self.address {
			Some(a) if a == address => 2,
			Some(_) => return None,
			None => 0,
		};
		Some(step_score + address_score)
	}
}

/// Mock executor with per-step and per-node scripted responses.
///
/// Unmatched calls succeed with empty output. When a timeout is configured,
/// any call whose delay exceeds it fails with [`RemoteError::Timeout`] after
/// the timeout elapses, like a real executor would.
#[derive(Clone, Debug, Default)]
pub struct MockExecutor {
	rules: Vec<Rule>,
	default_delay: Duration,
	timeout: Option<Duration>,
	calls: Arc<Mutex<Vec<MockCall>>>,
	in_flight: Arc<AtomicUsize>,
	peak: Arc<AtomicUsize>,
}

impl MockExecutor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Respond to `step` on every node with the given stdout.
	pub fn with_output(self, step: &str, stdout: impl Into<String>) -> Self {
		self.with_rule(step, None, Some(Ok(ExecOutput::with_stdout(stdout))), None)
	}

	/// Fail `step` on every node.
	pub fn with_error(self, step: &str, error: RemoteError) -> Self {
		self.with_rule(step, None, Some(Err(error)), None)
	}

	/// Respond to `step` on one node with the given stdout.
	pub fn with_node_output(self, step: &str, address: &str, stdout: impl Into<String>) -> Self {
		self.with_rule(
			step,
			Some(address),
			Some(Ok(ExecOutput::with_stdout(stdout))),
			None,
		)
	}

	/// Fail `step` on one node. Use [`ANY_STEP`] to fail every step there.
	pub fn with_node_error(self, step: &str, address: &str, error: RemoteError) -> Self {
		self.with_rule(step, Some(address), Some(Err(error)), None)
	}

	/// Delay `step` on one node before responding.
	pub fn with_node_delay(self, step: &str, address: &str, delay: Duration) -> Self {
		self.with_rule(step, Some(address), None, Some(delay))
	}

	/// Delay every call by `delay` unless a more specific delay applies.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.default_delay = delay;
		self
	}

	/// Emulate an executor command timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	fn with_rule(
		mut self,
		step: &str,
		address: Option<&str>,
		result: Option<Result<ExecOutput, RemoteError>>,
		delay: Option<Duration>,
	) -> Self {
		// Newer rules take priority over older ones of the same specificity.
		self.rules.insert(
			0,
			Rule {
				step: step.to_string(),
				address: address.map(str::to_string),
				result,
				delay,
			},
		);
		self
	}

	fn lookup<T>(
		&self,
		address: &str,
		step: &str,
		pick: impl Fn(&Rule) -> Option<T>,
	) -> Option<T> {
		let mut best: Option<(u8, T)> = None;
		for rule in &self.rules {
			let (Some(score), Some(value)) = (rule.score(address, step), pick(rule)) else {
				continue;
			};
			if best.as_ref().map_or(true, |(s, _)| score > *s) {
				best = Some((score, value));
			}
		}
		best.map(|(_, v)| v)
	}

	/// All calls so far, in call order.
	pub fn get_calls(&self) -> Vec<MockCall> {
		self.calls.lock().unwrap().clone()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().unwrap().len()
	}

	/// Step names run on `address`, in call order.
	pub fn steps_for(&self, address: &str) -> Vec<String> {
		self.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|c| c.address == address)
			.map(|c| c.step.clone())
			.collect()
	}

	/// Number of calls to `step` across all nodes.
	pub fn count_step(&self, step: &str) -> usize {
		self.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|c| c.step == step)
			.count()
	}

	/// Highest number of calls that were in flight at once.
	pub fn peak_concurrency(&self) -> usize {
		self.peak.load(Ordering::SeqCst)
	}
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
	async fn run(
		&self,
		node: &Node,
		script: &RemoteScript,
		cancel: &CancellationToken,
	) -> Result<ExecOutput, RemoteError> {
		let address = node.address();
		self.calls.lock().unwrap().push(MockCall {
			address: address.to_string(),
			step: script.step.clone(),
			body: script.body.clone(),
		});

		if cancel.is_cancelled() {
			return Err(RemoteError::Cancelled);
		}

		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak.fetch_max(now, Ordering::SeqCst);
		let _in_flight = InFlight(Arc::clone(&self.in_flight));

		let delay = self
			.lookup(address, &script.step, |r| r.delay)
			.unwrap_or(self.default_delay);
		let result = self
			.lookup(address, &script.step, |r| r.result.clone())
			.unwrap_or_else(|| Ok(ExecOutput::default()));

		let (wait, result) = match self.timeout {
			Some(timeout) if delay > timeout => (timeout, Err(RemoteError::Timeout { after: timeout })),
			_ => (delay, result),
		};

		if wait.is_zero() {
			// Yield once so concurrent callers genuinely overlap.
			tokio::task::yield_now().await;
			return result;
		}

		tokio::select! {
			_ = tokio::time::sleep(wait) => result,
			_ = cancel.cancelled() => Err(RemoteError::Cancelled),
		}
	}
}
