// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Join credentials issued by the control plane.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kforge_provision::JoinToken;

use crate::error::BootstrapError;

/// Lifetime assumed for credentials supplied on the command line, matching
/// kubeadm's default token TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything a worker needs to join the cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCredential {
	/// API server `host:port`.
	pub endpoint: String,
	pub token: JoinToken,
	/// `sha256:<64 hex>` pin of the cluster CA.
	pub ca_cert_hash: String,
	pub issued_at: DateTime<Utc>,
	pub ttl: Duration,
}

impl JoinCredential {
	/// Parse the output of `kubeadm token create --print-join-command`.
	///
	/// Tolerates line continuations and extra flags; requires the endpoint,
	/// `--token` and `--discovery-token-ca-cert-hash`.
	pub fn parse(
		output: &str,
		issued_at: DateTime<Utc>,
		ttl: Duration,
	) -> Result<Self, BootstrapError> {
		let words: Vec<&str> = output
			.split_whitespace()
			.filter(|w| *w != "\\")
			.collect();

		let join_at = words
			.windows(2)
			.position(|w| w == ["kubeadm", "join"])
			.ok_or_else(|| invalid("no `kubeadm join` command found"))?;
		let rest = &words[join_at + 2..];

		let endpoint = rest
			.first()
			.filter(|w| !w.starts_with("--"))
			.ok_or_else(|| invalid("missing API server endpoint"))?
			.to_string();
		let token = flag_value(rest, "--token").ok_or_else(|| invalid("missing --token"))?;
		let ca_cert_hash = flag_value(rest, "--discovery-token-ca-cert-hash")
			.ok_or_else(|| invalid("missing --discovery-token-ca-cert-hash"))?;

		let credential = Self {
			endpoint,
			token: JoinToken::new(token),
			ca_cert_hash: ca_cert_hash.to_string(),
			issued_at,
			ttl,
		};
		credential.validate()?;
		Ok(credential)
	}

	fn validate(&self) -> Result<(), BootstrapError> {
		let port_ok = self
			.endpoint
			.rsplit_once(':')
			.map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
			.unwrap_or(false);
		if !port_ok {
			return Err(invalid(format!(
				"endpoint '{}' is not host:port",
				self.endpoint
			)));
		}
		if !self.token.is_well_formed() {
			return Err(invalid("token is not of the form [a-z0-9]{6}.[a-z0-9]{16}"));
		}
		let hash_ok = self
			.ca_cert_hash
			.strip_prefix("sha256:")
			.map(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
			.unwrap_or(false);
		if !hash_ok {
			return Err(invalid("CA cert hash is not sha256:<64 hex digits>"));
		}
		Ok(())
	}

	pub fn expires_at(&self) -> DateTime<Utc> {
		let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365));
		self.issued_at + ttl
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at()
	}

	/// Fails with `CredentialExpired` once the TTL has elapsed.
	pub fn ensure_valid(&self, now: DateTime<Utc>) -> Result<(), BootstrapError> {
		if self.is_expired(now) {
			Err(BootstrapError::CredentialExpired {
				expired_at: self.expires_at(),
			})
		} else {
			Ok(())
		}
	}

	/// The full join command, token included. Only for handing the credential
	/// to an operator; never log it.
	pub fn join_command(&self) -> String {
		format!(
			"kubeadm join {} --token {} --discovery-token-ca-cert-hash {}",
			self.endpoint,
			self.token.expose(),
			self.ca_cert_hash
		)
	}
}

impl fmt::Debug for JoinCredential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JoinCredential")
			.field("endpoint", &self.endpoint)
			.field("token", &self.token)
			.field("ca_cert_hash", &self.ca_cert_hash)
			.field("issued_at", &self.issued_at)
			.field("ttl", &self.ttl)
			.finish()
	}
}

impl fmt::Display for JoinCredential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "join {} (token {}.****)", self.endpoint, self.token.id())
	}
}

/// Parses a join command supplied by an operator, assuming it was issued now
/// with the default TTL.
impl FromStr for JoinCredential {
	type Err = BootstrapError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();
		// Accept the bare arguments as well as the full command.
		if trimmed.starts_with("kubeadm") {
			Self::parse(trimmed, Utc::now(), DEFAULT_TTL)
		} else {
			Self::parse(&format!("kubeadm join {trimmed}"), Utc::now(), DEFAULT_TTL)
		}
	}
}

fn flag_value<'a>(words: &[&'a str], flag: &str) -> Option<&'a str> {
	let prefix = format!("{flag}=");
	words.iter().copied().enumerate().find_map(|(i, w)| {
		if w == flag {
			words.get(i + 1).copied()
		} else {
			w.strip_prefix(prefix.as_str())
		}
	})
}

fn invalid(reason: impl Into<String>) -> BootstrapError {
	BootstrapError::InvalidCredential {
		reason: reason.into(),
	}
}
