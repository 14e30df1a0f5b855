//! Client-credentials configuration: raw settings as read from app config, and the validated,
//! immutable form the token cache is built from.
//!
//! Settings are read once at startup. A block with any of `clientId`, `clientSecret`, or
//! `tokenUrl` absent (or blank) means service-token acquisition is not activated; see
//! [`crate::service::ServiceTokens`] for how that condition reaches callers.

// crates.io
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ScopeList, TokenSecret},
	error::ConfigError,
};

/// Raw client-credentials block; every field is optional until resolved.
///
/// Keys follow the platform's camelCase app-config names; snake_case aliases are accepted too.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentialsSettings {
	/// OAuth 2.0 client identifier.
	#[serde(default, alias = "client_id")]
	pub client_id: Option<String>,
	/// OAuth 2.0 client secret.
	#[serde(default, alias = "client_secret")]
	pub client_secret: Option<TokenSecret>,
	/// Absolute token endpoint URL.
	#[serde(default, alias = "token_url")]
	pub token_url: Option<String>,
	/// Optional ordered scopes requested with every grant.
	#[serde(default)]
	pub scopes: Option<Vec<String>>,
}
impl ClientCredentialsSettings {
	/// Names of required settings that are absent or blank, in declaration order.
	pub fn missing_fields(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();

		if is_blank(self.client_id.as_deref()) {
			missing.push("clientId");
		}
		if is_blank(self.client_secret.as_ref().map(TokenSecret::expose)) {
			missing.push("clientSecret");
		}
		if is_blank(self.token_url.as_deref()) {
			missing.push("tokenUrl");
		}

		missing
	}

	/// Returns true when every required setting is present.
	pub fn is_complete(&self) -> bool {
		self.missing_fields().is_empty()
	}

	/// Validates the settings into a [`ClientCredentialsConfig`].
	pub fn resolve(self) -> Result<ClientCredentialsConfig, ConfigError> {
		if let Some(field) = self.missing_fields().first().copied() {
			return Err(ConfigError::MissingField { field });
		}

		let (Some(client_id), Some(client_secret), Some(token_url)) =
			(self.client_id, self.client_secret, self.token_url)
		else {
			return Err(ConfigError::NotConfigured);
		};
		let token_url = Url::parse(token_url.trim())
			.map_err(|source| ConfigError::InvalidTokenUrl { source })?;

		ClientCredentialsConfig::new(
			client_id.trim(),
			client_secret,
			token_url,
			self.scopes.unwrap_or_default(),
		)
	}
}

/// Validated client-credentials parameters, immutable for the lifetime of the cache.
#[derive(Clone, Debug)]
pub struct ClientCredentialsConfig {
	client_id: String,
	client_secret: TokenSecret,
	token_url: Url,
	scopes: ScopeList,
}
impl ClientCredentialsConfig {
	/// Builds a config from already-typed parts.
	pub fn new<I, S>(
		client_id: impl Into<String>,
		client_secret: impl Into<TokenSecret>,
		token_url: Url,
		scopes: I,
	) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let client_id = client_id.into();
		let client_secret = client_secret.into();

		if client_id.is_empty() {
			return Err(ConfigError::MissingField { field: "clientId" });
		}
		if client_secret.is_empty() {
			return Err(ConfigError::MissingField { field: "clientSecret" });
		}
		if !matches!(token_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: token_url.to_string() });
		}

		Ok(Self { client_id, client_secret, token_url, scopes: ScopeList::new(scopes)? })
	}

	/// OAuth 2.0 client identifier.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// OAuth 2.0 client secret.
	pub fn client_secret(&self) -> &TokenSecret {
		&self.client_secret
	}

	/// Token endpoint URL.
	pub fn token_url(&self) -> &Url {
		&self.token_url
	}

	/// Scopes requested with the grant, in configured order.
	pub fn scopes(&self) -> &ScopeList {
		&self.scopes
	}

	/// Encodes the `application/x-www-form-urlencoded` client-credentials grant body.
	///
	/// The `scope` parameter is present only when at least one scope is configured.
	pub fn token_request_form(&self) -> String {
		let mut form = form_urlencoded::Serializer::new(String::new());

		form.append_pair("grant_type", "client_credentials")
			.append_pair("client_id", &self.client_id)
			.append_pair("client_secret", self.client_secret.expose());

		if let Some(scope) = self.scopes.to_request_value() {
			form.append_pair("scope", &scope);
		}

		form.finish()
	}
}

fn is_blank(value: Option<&str>) -> bool {
	value.is_none_or(|v| v.trim().is_empty())
}
