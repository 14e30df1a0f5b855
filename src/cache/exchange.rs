//! The client-credentials exchange performed once per refresh cycle.
//!
//! Builds the form-encoded grant, posts it to the configured token endpoint, and turns the
//! response into a [`CachedToken`]. Non-2xx responses fail with their body attached; a 2xx body
//! must parse as a token response. Expiry comes from the token's JWT `exp` claim when it has one.

// crates.io
use oauth2::{
	HttpRequest,
	http::{
		Method, Request,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	config::ClientCredentialsConfig,
	error::{ConfigError, EndpointError},
	http::{self, TokenHttpClient},
	obs::{self, FetchOp, FetchOutcome, FetchSpan},
	token::{CachedToken, TokenResponse},
};

const TARGET: &str = "token endpoint";

/// Builds the `POST {token_url}` client-credentials request.
pub fn build_token_request(config: &ClientCredentialsConfig) -> Result<HttpRequest> {
	Request::builder()
		.method(Method::POST)
		.uri(config.token_url().as_str())
		.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
		.header(ACCEPT, "application/json")
		.body(config.token_request_form().into_bytes())
		.map_err(|e| ConfigError::from(e).into())
}

/// Performs one client-credentials exchange and derives the resulting token's expiry.
///
/// `clock` supplies the receive instant used by the `expires_in` fallback.
pub async fn fetch_new_token<C>(
	http_client: &C,
	config: &ClientCredentialsConfig,
	clock: &dyn Clock,
) -> Result<CachedToken>
where
	C: ?Sized + TokenHttpClient,
{
	const OP: FetchOp = FetchOp::Token;

	let span = FetchSpan::new(OP, "fetch_new_token");

	obs::record_fetch_outcome(OP, FetchOutcome::Attempt);

	let result = span
		.instrument(async move {
			let request = build_token_request(config)?;
			let response = http::execute(http_client, TARGET, request).await?;
			let status = response.status();

			if !status.is_success() {
				return Err(Error::from(EndpointError::Status {
					status: status.as_u16(),
					body: String::from_utf8_lossy(response.body()).into_owned(),
				}));
			}

			let parsed = TokenResponse::parse(status.as_u16(), response.body())?;
			let token = CachedToken::from_response(parsed, clock.now());

			obs::record_expiry_source(token.expiry_source());

			Ok(token)
		})
		.await;

	match &result {
		Ok(_) => obs::record_fetch_outcome(OP, FetchOutcome::Success),
		Err(_) => obs::record_fetch_outcome(OP, FetchOutcome::Failure),
	}

	result
}
