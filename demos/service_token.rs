//! Demonstrates resolving an app-config client-credentials block into [`ServiceTokens`] and
//! attaching the cached service token to outbound platform API calls.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use openchoreo_service_auth::{
	config::ClientCredentialsSettings, http::ReqwestHttpClient, reqwest::Client,
	service::ServiceTokens,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"demo-service-token\",\"expires_in\":900}");
		})
		.await;
	let settings: ClientCredentialsSettings = serde_json::from_value(serde_json::json!({
		"clientId": "openchoreo-backend",
		"clientSecret": "super-secret",
		"tokenUrl": server.url("/oauth2/token"),
		"scopes": ["openchoreo:read"],
	}))?;
	let http_client = ReqwestHttpClient::with_client(
		Client::builder().danger_accept_invalid_certs(true).build()?,
	);
	let tokens = ServiceTokens::<ReqwestHttpClient>::from_settings(settings, http_client)?;

	for call in 1..=3 {
		let header = tokens.authorization_header().await?;

		println!("Platform API call {call} authorized with {} characters of bearer.", header.len());
	}

	token_mock.assert_async().await;

	// A 401 from the platform API means the token was revoked early.
	tokens.invalidate();
	tokens.get_token().await?;
	token_mock.assert_calls_async(2).await;

	let unconfigured = ServiceTokens::<ReqwestHttpClient>::from_settings(
		ClientCredentialsSettings::default(),
		ReqwestHttpClient::default(),
	)?;

	println!(
		"Unconfigured deployment ({:?} missing): {}",
		unconfigured.missing(),
		unconfigured.get_token().await.err().map(|e| e.to_string()).unwrap_or_default()
	);

	Ok(())
}
