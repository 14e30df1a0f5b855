//! Helpers shared by the reqwest-backed integration tests.

#![allow(dead_code)]

// crates.io
use httpmock::MockServer;
use serde_json::json;
// self
use openchoreo_service_auth::{
	config::{ClientCredentialsConfig, ClientCredentialsSettings},
	http::ReqwestHttpClient,
	jsonwebtoken::{self, EncodingKey, Header},
	reqwest::Client,
	url::Url,
};

pub const CLIENT_ID: &str = "choreo-backend";
pub const CLIENT_SECRET: &str = "choreo-backend-secret";
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
/// `httpmock` during tests.
pub fn test_reqwest_http_client() -> ReqwestHttpClient {
	let client = Client::builder()
		.danger_accept_invalid_certs(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestHttpClient::with_client(client)
}

/// Token URL served by `server`.
pub fn token_url(server: &MockServer) -> Url {
	Url::parse(&server.url(TOKEN_PATH)).expect("Mock token endpoint should parse successfully.")
}

/// Validated config pointing at `server`'s token endpoint.
pub fn test_config(server: &MockServer, scopes: &[&str]) -> ClientCredentialsConfig {
	ClientCredentialsConfig::new(
		CLIENT_ID,
		CLIENT_SECRET,
		token_url(server),
		scopes.iter().copied(),
	)
	.expect("Test client-credentials config should be valid.")
}

/// Raw settings pointing at `server`'s token endpoint.
pub fn test_settings(server: &MockServer) -> ClientCredentialsSettings {
	ClientCredentialsSettings {
		client_id: Some(CLIENT_ID.into()),
		client_secret: Some(CLIENT_SECRET.into()),
		token_url: Some(token_url(server).into()),
		scopes: None,
	}
}

/// Token-endpoint success body.
pub fn token_body(access_token: &str, expires_in: i64) -> String {
	json!({
		"access_token": access_token,
		"token_type": "Bearer",
		"expires_in": expires_in,
	})
	.to_string()
}

/// HS256-signed JWT carrying `exp`, the way identity providers issue service tokens.
pub fn jwt_expiring_at(exp: i64) -> String {
	jsonwebtoken::encode(
		&Header::default(),
		&json!({ "sub": CLIENT_ID, "exp": exp }),
		&EncodingKey::from_secret(b"token-issuer-key"),
	)
	.expect("Test JWT should encode.")
}
