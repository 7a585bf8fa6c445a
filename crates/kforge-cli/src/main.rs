// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! kforge - bootstrap kubeadm Kubernetes clusters over SSH.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use kforge_bootstrap::{plan_steps, Deployer, JoinCredential};
use kforge_config::{load_config, CliOverrides, KforgeConfig, LogFormat, LoggingConfig};
use kforge_inventory::{load_terraform_output, InventorySpec, NodeRole, TcpProbe, TerraformKeys};
use kforge_remote::{CancellationToken, SshExecutor};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod output;
mod version;

/// kforge - deploy a kubeadm cluster to a set of hosts over SSH.
#[derive(Parser, Debug)]
#[command(name = "kforge", about = "Bootstrap kubeadm Kubernetes clusters over SSH", version)]
struct Args {
	#[command(flatten)]
	global: GlobalArgs,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct GlobalArgs {
	/// Configuration file, layered over the system and user files
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, global = true)]
	log_level: Option<String>,

	/// Emit logs as JSON
	#[arg(long, global = true)]
	json_logs: bool,

	/// SSH user on every node
	#[arg(long, global = true)]
	ssh_user: Option<String>,

	/// SSH port on every node
	#[arg(long, global = true)]
	ssh_port: Option<u16>,

	/// SSH private key (defaults to the agent)
	#[arg(long, short = 'i', global = true)]
	identity: Option<PathBuf>,

	/// Nodes provisioned or joined at once
	#[arg(long, global = true)]
	max_parallel: Option<usize>,
}

impl GlobalArgs {
	fn overrides(&self) -> CliOverrides {
		CliOverrides {
			config_file: self.config.clone(),
			log_level: self.log_level.clone(),
			log_format: self.json_logs.then_some(LogFormat::Json),
			ssh_user: self.ssh_user.clone(),
			ssh_port: self.ssh_port,
			identity_file: self.identity.clone(),
			max_parallel: self.max_parallel,
		}
	}
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Deploy a single control-plane or worker node
	Deploy(DeployArgs),

	/// Deploy a control plane and all of its workers
	DeployCluster(DeployClusterArgs),

	/// Wait until the given nodes report Ready
	Verify(VerifyArgs),

	/// Run `kubeadm reset` and clear kforge state on nodes
	Reset(ResetArgs),

	/// Print the scripts a node would run, without connecting
	Plan(PlanArgs),

	/// Show version and build information
	Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
	ControlPlane,
	Worker,
}

impl From<RoleArg> for NodeRole {
	fn from(role: RoleArg) -> Self {
		match role {
			RoleArg::ControlPlane => NodeRole::ControlPlane,
			RoleArg::Worker => NodeRole::Worker,
		}
	}
}

#[derive(Debug, Clone, clap::Args)]
struct DeployArgs {
	#[arg(long, value_enum)]
	role: RoleArg,

	/// Address of the node
	#[arg(long)]
	address: String,

	/// `kubeadm join` command or its arguments; required for workers
	#[arg(long, env = "KFORGE_JOIN_CREDENTIAL", hide_env_values = true)]
	join_credential: Option<String>,

	/// Print the run report as JSON
	#[arg(long)]
	json: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct DeployClusterArgs {
	/// Control-plane address; falls back to the configured inventory
	control_plane: Option<String>,

	/// Worker addresses
	workers: Vec<String>,

	/// Read the inventory from `terraform output -json`
	#[arg(long, conflicts_with = "control_plane")]
	terraform_output: Option<PathBuf>,

	/// Print the run report as JSON
	#[arg(long)]
	json: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct VerifyArgs {
	#[arg(long)]
	control_plane: String,

	/// Node address or name expected to be Ready (repeatable)
	#[arg(long = "expect")]
	expect: Vec<String>,

	#[arg(long)]
	json: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct ResetArgs {
	#[arg(required = true)]
	addresses: Vec<String>,
}

#[derive(Debug, Clone, clap::Args)]
struct PlanArgs {
	#[arg(long, value_enum, default_value = "control-plane")]
	role: RoleArg,
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("kforge={}", logging.level)));

	let fmt_layer = match logging.format {
		LogFormat::Json => tracing_subscriber::fmt::layer()
			.json()
			.with_writer(std::io::stderr)
			.boxed(),
		LogFormat::Compact => tracing_subscriber::fmt::layer()
			.compact()
			.with_writer(std::io::stderr)
			.boxed(),
		LogFormat::Pretty => tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.boxed(),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer)
		.init();
}

/// Work out which nodes to deploy: explicit arguments first, then a
/// Terraform output file, then the `[inventory]` config section.
fn cluster_spec(args: &DeployClusterArgs, config: &KforgeConfig) -> anyhow::Result<InventorySpec> {
	if let Some(control_plane) = &args.control_plane {
		return Ok(InventorySpec::new(control_plane.clone(), args.workers.clone()));
	}

	let keys = TerraformKeys::from_config(&config.inventory);
	if let Some(path) = args
		.terraform_output
		.as_ref()
		.or(config.inventory.terraform_output.as_ref())
	{
		return load_terraform_output(path, &keys)
			.with_context(|| format!("loading inventory from {}", path.display()));
	}

	if let Some(control_plane) = &config.inventory.control_plane {
		return Ok(InventorySpec::new(
			control_plane.clone(),
			config.inventory.workers.clone(),
		));
	}

	bail!(
		"no inventory given: pass <control-plane> <worker>..., --terraform-output, \
		 or set [inventory] in the config file"
	)
}

fn deployer(config: &KforgeConfig) -> Deployer {
	Deployer::new(
		config.clone(),
		Arc::new(SshExecutor::new(&config.ssh)),
		Arc::new(TcpProbe),
	)
}

/// Cancel `token` on Ctrl-C. In-flight remote steps are abandoned and their
/// nodes reported as unknown.
fn cancel_on_interrupt(token: CancellationToken) {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("interrupt received, stopping");
			eprintln!(
				"{} interrupted; nodes with steps in flight will be reported as unknown",
				style("!").yellow().bold()
			);
			token.cancel();
		}
	});
}

async fn run(command: Command, config: KforgeConfig, cancel: CancellationToken) -> anyhow::Result<i32> {
	match command {
		Command::Deploy(args) => {
			let deployer = deployer(&config);
			match args.role {
				RoleArg::ControlPlane => {
					let (report, credential) = deployer
						.deploy_control_plane(&args.address, &cancel)
						.await?;
					if args.json {
						output::print_json(&serde_json::json!({
							"report": report,
							"join_command": credential.as_ref().map(JoinCredential::join_command),
						}))?;
					} else {
						output::print_report(&report);
						if let Some(credential) = &credential {
							println!();
							println!(
								"{} join workers with (keep this secret, expires {}):",
								style("→").cyan().bold(),
								credential.expires_at()
							);
							println!("  {}", credential.join_command());
						}
					}
					Ok(report.exit_code())
				}
				RoleArg::Worker => {
					let credential = args
						.join_credential
						.as_deref()
						.map(str::parse::<JoinCredential>)
						.transpose()
						.context("parsing --join-credential")?;
					let report = deployer
						.deploy_worker(&args.address, credential, &cancel)
						.await?;
					if args.json {
						output::print_json(&report)?;
					} else {
						output::print_report(&report);
					}
					Ok(report.exit_code())
				}
			}
		}
		Command::DeployCluster(args) => {
			let spec = cluster_spec(&args, &config)?;
			info!(control_plane = %spec.control_plane, workers = spec.workers.len(), "deploying cluster");
			let report = deployer(&config).deploy_cluster(&spec, &cancel).await?;
			if args.json {
				output::print_json(&report)?;
			} else {
				output::print_report(&report);
			}
			Ok(report.exit_code())
		}
		Command::Verify(args) => {
			let summary = deployer(&config)
				.verify(&args.control_plane, &args.expect, &cancel)
				.await?;
			if args.json {
				output::print_json(&summary)?;
			} else {
				output::print_verification(&summary);
			}
			Ok(if summary.timed_out { 1 } else { 0 })
		}
		Command::Reset(args) => {
			let results = deployer(&config).reset(&args.addresses, &cancel).await?;
			output::print_resets(&results);
			Ok(if results.iter().all(|r| r.error.is_none()) { 0 } else { 1 })
		}
		Command::Plan(args) => {
			for step in plan_steps(args.role.into(), &config) {
				println!("{}", style(format!("# ---- {} ----", step.name())).bold());
				println!("{}", step.render().body);
			}
			Ok(0)
		}
		Command::Version => {
			println!("{}", version::format_version_info());
			Ok(0)
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = load_config(args.global.overrides()).context("loading configuration")?;
	init_tracing(&config.logging);

	let cancel = CancellationToken::new();
	cancel_on_interrupt(cancel.clone());

	let code = run(args.command, config, cancel).await?;
	std::process::exit(code)
}
