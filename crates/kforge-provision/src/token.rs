// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bootstrap token that never appears in logs.

use std::fmt;

use zeroize::Zeroize;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

/// A kubeadm bootstrap token (`abcdef.0123456789abcdef`).
///
/// Debug and Display are redacted and the value is zeroized on drop. There is
/// no `Deref`; call [`JoinToken::expose`] to read it.
#[derive(Zeroize, Clone, PartialEq, Eq)]
#[zeroize(drop)]
pub struct JoinToken {
	inner: String,
}

impl JoinToken {
	pub fn new(inner: impl Into<String>) -> Self {
		Self {
			inner: inner.into(),
		}
	}

	pub fn expose(&self) -> &str {
		&self.inner
	}

	/// True when the token has kubeadm's `[a-z0-9]{6}.[a-z0-9]{16}` shape.
	pub fn is_well_formed(&self) -> bool {
		let Some((id, secret)) = self.inner.split_once('.') else {
			return false;
		};
		let valid = |s: &str, len: usize| {
			s.len() == len
				&& s
					.chars()
					.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
		};
		valid(id, 6) && valid(secret, 16)
	}

	/// The public half of the token, safe to log.
	pub fn id(&self) -> &str {
		self.inner.split('.').next().unwrap_or_default()
	}
}

impl fmt::Debug for JoinToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("JoinToken").field(&REDACTED).finish()
	}
}

impl fmt::Display for JoinToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}
