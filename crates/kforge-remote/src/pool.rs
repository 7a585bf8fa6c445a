// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded fan-out with isolated per-task results.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, trace};

/// Result of one pooled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
	Completed(T),
	/// The task panicked or was aborted; the message is the panic payload.
	Panicked(String),
}

impl<T> TaskOutcome<T> {
	pub fn completed(self) -> Option<T> {
		match self {
			TaskOutcome::Completed(value) => Some(value),
			TaskOutcome::Panicked(_) => None,
		}
	}
}

/// Runs at most `limit` tasks at once.
#[derive(Debug, Clone, Copy)]
pub struct BoundedPool {
	limit: usize,
}

impl BoundedPool {
	/// A limit of zero is treated as one.
	pub fn new(limit: usize) -> Self {
		Self {
			limit: limit.max(1),
		}
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	/// Run `task` for every item and return the outcomes in input order.
	///
	/// A panic in one task is captured as [`TaskOutcome::Panicked`] and never
	/// affects the others.
	pub async fn run<I, F, Fut, T>(&self, items: Vec<I>, task: F) -> Vec<TaskOutcome<T>>
	where
		F: Fn(I) -> Fut,
		Fut: Future<Output = T> + Send + 'static,
		T: Send + 'static,
	{
		let total = items.len();
		let semaphore = Arc::new(Semaphore::new(self.limit));
		let mut set = JoinSet::new();

		for (index, item) in items.into_iter().enumerate() {
			let fut = task(item);
			let semaphore = Arc::clone(&semaphore);
			set.spawn(async move {
				// The semaphore is never closed, so acquisition only fails if
				// that changes; run unbounded rather than drop the task.
				let _permit = semaphore.acquire_owned().await.ok();
				trace!(index, "pool task started");
				let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
					Ok(value) => TaskOutcome::Completed(value),
					Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
				};
				(index, outcome)
			});
		}

		let mut results: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
		while let Some(joined) = set.join_next().await {
			match joined {
				Ok((index, outcome)) => {
					if let TaskOutcome::Panicked(message) = &outcome {
						error!(index, %message, "pool task panicked");
					}
					results[index] = Some(outcome);
				}
				Err(e) => error!(error = %e, "pool task aborted"),
			}
		}

		results
			.into_iter()
			.map(|r| r.unwrap_or_else(|| TaskOutcome::Panicked("task aborted".to_string())))
			.collect()
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"task panicked".to_string()
	}
}
