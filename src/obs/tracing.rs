// self
use crate::{_prelude::*, obs::FetchOp};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFetch<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFetch<F> = F;

/// A span builder used around network fetches.
#[derive(Clone, Debug)]
pub struct FetchSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FetchSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(op: FetchOp, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("openchoreo_auth.fetch", op = op.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (op, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFetch<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a debug-level event describing a cache decision (when tracing is enabled).
pub fn trace_decision(op: FetchOp, decision: &'static str) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(op = op.as_str(), decision, "openchoreo_auth cache decision");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (op, decision);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn decisions_noop_without_tracing() {
		trace_decision(FetchOp::Token, "cache_hit");
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FetchSpan::new(FetchOp::Jwks, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
