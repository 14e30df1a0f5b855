// self
use crate::{
	obs::{FetchOp, FetchOutcome},
	token::ExpirySource,
};

/// Records a fetch outcome via the global metrics recorder (when enabled).
pub fn record_fetch_outcome(op: FetchOp, outcome: FetchOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"openchoreo_auth_fetch_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

/// Records which source a freshly cached token's expiry was derived from.
pub fn record_expiry_source(source: ExpirySource) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("openchoreo_auth_token_expiry_source_total", "source" => source.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = source;
	}
}
