//! Optional observability helpers for token and JWKS fetches.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `openchoreo_auth.fetch` with the `op`
//!   (operation) and `stage` (call site) fields, plus debug events for cache decisions.
//! - Enable `metrics` to increment the `openchoreo_auth_fetch_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`, and the
//!   `openchoreo_auth_token_expiry_source_total` counter labeled by `source`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Network operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchOp {
	/// Client-credentials exchange against the token endpoint.
	Token,
	/// JWKS document retrieval.
	Jwks,
}
impl FetchOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FetchOp::Token => "token",
			FetchOp::Jwks => "jwks",
		}
	}
}
impl Display for FetchOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchOutcome {
	/// A network fetch was started.
	Attempt,
	/// The fetch produced a usable result.
	Success,
	/// The fetch failed and the error was propagated.
	Failure,
}
impl FetchOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FetchOutcome::Attempt => "attempt",
			FetchOutcome::Success => "success",
			FetchOutcome::Failure => "failure",
		}
	}
}
impl Display for FetchOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
