// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote execution through the system `ssh` client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kforge_config::{HostKeyPolicy, SshConfig};
use kforge_inventory::{Node, SshAuth};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ConnectionKind, RemoteError};
use crate::executor::{ExecOutput, RemoteExecutor, RemoteScript};

/// ssh reserves this exit status for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

/// Keep error messages readable when a script dumps a lot to stderr.
const STDERR_TAIL_BYTES: usize = 4096;

/// Executor that spawns `ssh` in batch mode and streams the script on stdin.
#[derive(Debug, Clone)]
pub struct SshExecutor {
	program: PathBuf,
	program_args: Vec<String>,
	connect_timeout: Duration,
	command_timeout: Duration,
	sudo: bool,
	host_key_policy: HostKeyPolicy,
	known_hosts_file: Option<PathBuf>,
}

impl SshExecutor {
	pub fn new(config: &SshConfig) -> Self {
		Self {
			program: PathBuf::from("ssh"),
			program_args: Vec::new(),
			connect_timeout: Duration::from_secs(config.connect_timeout_secs),
			command_timeout: Duration::from_secs(config.command_timeout_secs),
			sudo: config.sudo,
			host_key_policy: config.host_key_policy,
			known_hosts_file: config.known_hosts_file.clone(),
		}
	}

	/// Run a different client (a wrapper script, a jump-host shim) in place of
	/// `ssh`. `leading_args` go before the generated ssh arguments.
	pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
		self.program = program.into();
		self.program_args = leading_args;
		self
	}

	pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
		self.command_timeout = timeout;
		self
	}

	pub fn command_timeout(&self) -> Duration {
		self.command_timeout
	}

	/// Arguments passed to ssh for `node`, ending with the remote command.
	pub fn ssh_args(&self, node: &Node) -> Vec<String> {
		let identity = node.credential();
		let mut args = vec![
			"-T".to_string(),
			"-o".to_string(),
			"BatchMode=yes".to_string(),
			"-o".to_string(),
			format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
			"-o".to_string(),
			format!(
				"StrictHostKeyChecking={}",
				self.host_key_policy.ssh_option_value()
			),
			"-o".to_string(),
			"ServerAliveInterval=30".to_string(),
		];

		if let Some(known_hosts) = &self.known_hosts_file {
			args.push("-o".to_string());
			args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
		}

		args.push("-p".to_string());
		args.push(identity.port.to_string());

		if let SshAuth::KeyFile(path) = &identity.auth {
			args.push("-i".to_string());
			args.push(path.display().to_string());
			args.push("-o".to_string());
			args.push("IdentitiesOnly=yes".to_string());
		}

		args.push(format!("{}@{}", identity.user, node.address()));
		args.push("--".to_string());
		args.push(self.remote_command().to_string());
		args
	}

	fn remote_command(&self) -> &'static str {
		if self.sudo {
			"sudo -n bash -s"
		} else {
			"bash -s"
		}
	}

	async fn exchange(&self, node: &Node, script: &RemoteScript) -> Result<ExecOutput, RemoteError> {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.program_args)
			.args(self.ssh_args(node))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		trace!(
			program = %self.program.display(),
			address = node.address(),
			step = %script.step,
			"spawning ssh"
		);

		let started = Instant::now();
		let mut child = cmd.spawn()?;
		let mut stdin = child.stdin.take().ok_or_else(|| RemoteError::Spawn {
			message: "ssh stdin was not captured".to_string(),
		})?;

		let body = script.body.as_bytes();
		let write = async move {
			let result = stdin.write_all(body).await;
			drop(stdin);
			result
		};
		let (written, output) = tokio::join!(write, child.wait_with_output());
		if let Err(e) = written {
			// The remote side may close stdin early (e.g. connection refused);
			// the exit status tells the real story.
			trace!(error = %e, "ssh stdin closed before script was fully written");
		}
		let output = output?;
		let duration = started.elapsed();

		let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
		let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

		match output.status.code() {
			Some(0) => Ok(ExecOutput {
				stdout,
				stderr,
				exit_code: 0,
				duration,
			}),
			Some(SSH_FAILURE_EXIT) => {
				let message = tail(stderr.trim(), STDERR_TAIL_BYTES);
				Err(RemoteError::Connection {
					address: node.address().to_string(),
					kind: ConnectionKind::classify(&message),
					message,
				})
			}
			Some(code) => Err(RemoteError::RemoteExecution {
				exit_code: code,
				stderr: tail(stderr.trim(), STDERR_TAIL_BYTES),
			}),
			None => Err(RemoteError::RemoteExecution {
				exit_code: -1,
				stderr: "ssh terminated by signal".to_string(),
			}),
		}
	}
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
	async fn run(
		&self,
		node: &Node,
		script: &RemoteScript,
		cancel: &CancellationToken,
	) -> Result<ExecOutput, RemoteError> {
		if cancel.is_cancelled() {
			return Err(RemoteError::Cancelled);
		}

		debug!(address = node.address(), step = %script.step, "running remote step");

		// Dropping the exchange future kills the local ssh process.
		tokio::select! {
			result = self.exchange(node, script) => {
				match &result {
					Ok(out) => debug!(
						address = node.address(),
						step = %script.step,
						duration_ms = out.duration.as_millis() as u64,
						"remote step finished"
					),
					Err(e) => debug!(
						address = node.address(),
						step = %script.step,
						error = %e,
						"remote step failed"
					),
				}
				result
			}
			_ = tokio::time::sleep(self.command_timeout) => {
				warn!(
					address = node.address(),
					step = %script.step,
					timeout_secs = self.command_timeout.as_secs(),
					"remote step timed out"
				);
				Err(RemoteError::Timeout { after: self.command_timeout })
			}
			_ = cancel.cancelled() => {
				warn!(address = node.address(), step = %script.step, "remote step cancelled");
				Err(RemoteError::Cancelled)
			}
		}
	}
}

fn tail(s: &str, max_bytes: usize) -> String {
	if s.len() <= max_bytes {
		return s.to_string();
	}
	let mut start = s.len() - max_bytes;
	while !s.is_char_boundary(start) {
		start += 1;
	}
	format!("...{}", &s[start..])
}
