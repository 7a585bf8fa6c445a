// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Terminal rendering of run reports.

use console::style;
use kforge_bootstrap::{NodeOutcome, NodeReport, ResetResult, RunReport, VerificationSummary};

const HEADERS: [&str; 5] = ["NODE", "ROLE", "STAGE", "OUTCOME", "DETAIL"];

fn row(node: &NodeReport) -> [String; 5] {
	[
		node.address.clone(),
		node.role.to_string(),
		node.last_stage
			.as_ref()
			.map_or_else(|| "-".to_string(), ToString::to_string),
		node.outcome.label().to_string(),
		node.outcome.detail().unwrap_or("").to_string(),
	]
}

fn widths(rows: &[[String; 5]]) -> [usize; 5] {
	let mut widths = HEADERS.map(str::len);
	for row in rows {
		for (w, cell) in widths.iter_mut().zip(row) {
			*w = (*w).max(cell.len());
		}
	}
	widths
}

/// Render the node table without colour, one line per node.
pub fn render_table(report: &RunReport) -> Vec<String> {
	let rows: Vec<[String; 5]> = report.nodes().map(row).collect();
	let widths = widths(&rows);
	let line = |cells: [&str; 5]| {
		cells
			.iter()
			.zip(widths)
			.map(|(cell, w)| format!("{cell:<w$}"))
			.collect::<Vec<_>>()
			.join("  ")
			.trim_end()
			.to_string()
	};

	let mut lines = vec![line(HEADERS)];
	for r in &rows {
		lines.push(line([&r[0], &r[1], &r[2], &r[3], &r[4]]));
	}
	lines
}

fn styled_outcome(outcome: &NodeOutcome, text: &str) -> String {
	match outcome {
		NodeOutcome::Succeeded => style(text).green().to_string(),
		NodeOutcome::Failed { .. } => style(text).red().bold().to_string(),
		NodeOutcome::Unknown { .. } => style(text).yellow().bold().to_string(),
		NodeOutcome::Skipped { .. } => style(text).dim().to_string(),
	}
}

pub fn print_report(report: &RunReport) {
	println!(
		"{} run {}",
		style("kforge").bold(),
		style(report.run_id).cyan()
	);
	println!();

	let lines = render_table(report);
	let outcomes: Vec<&NodeOutcome> = report.nodes().map(|n| &n.outcome).collect();
	if let Some((header, body)) = lines.split_first() {
		println!("{}", style(header).bold());
		for (line, outcome) in body.iter().zip(outcomes) {
			println!("{}", styled_outcome(outcome, line));
		}
	}

	if let Some(verification) = &report.verification {
		println!();
		print_verification(verification);
	}

	if let Some(reason) = &report.aborted {
		println!();
		println!("{} {}", style("✗ aborted:").red().bold(), reason);
	}

	println!();
	if let Some(cp) = &report.control_plane {
		println!(
			"control plane: {}",
			cp.last_stage
				.as_ref()
				.map_or_else(|| cp.outcome.label().to_string(), ToString::to_string)
		);
	}
	println!("workers joined: {}", workers_joined(report));

	let code = report.exit_code();
	let summary = match code {
		0 => style("✓ cluster ready".to_string()).green().bold(),
		2 => style("! control plane ready, some workers are not".to_string())
			.yellow()
			.bold(),
		_ => style("✗ deployment failed".to_string()).red().bold(),
	};
	println!();
	println!("{summary} (exit {code})");
}

/// `joined/total`, counting workers that succeeded.
pub fn workers_joined(report: &RunReport) -> String {
	let joined = report
		.workers
		.iter()
		.filter(|w| w.outcome.is_succeeded())
		.count();
	format!("{joined}/{}", report.workers.len())
}

pub fn print_verification(summary: &VerificationSummary) {
	let ready = summary.nodes.iter().filter(|n| n.ready).count();
	if summary.timed_out {
		println!(
			"{} {}/{} nodes ready when verification timed out",
			style("!").yellow().bold(),
			ready,
			summary.nodes.len()
		);
	} else {
		println!(
			"{} {}/{} nodes ready",
			style("✓").green().bold(),
			ready,
			summary.nodes.len()
		);
	}
	for node in &summary.nodes {
		let marker = if node.ready {
			style("ready").green()
		} else {
			style("not ready").red()
		};
		println!("  {:<24} {:<18} {}", node.node_name, node.addresses.join(","), marker);
	}
	for missing in &summary.not_ready {
		println!("  {} {}", style("missing:").red(), missing);
	}
}

pub fn print_resets(results: &[ResetResult]) {
	for result in results {
		match &result.error {
			None => println!("{} {} reset", style("✓").green().bold(), result.address),
			Some(e) => println!("{} {} {}", style("✗").red().bold(), result.address, e),
		}
	}
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
