//! Checked entry point for service-token acquisition.
//!
//! Request-handling code holds a [`ServiceTokens`] rather than a bare [`TokenCache`], so an
//! unconfigured deployment fails each call with [`ConfigError::NotConfigured`] instead of
//! misbehaving later.

// crates.io
use oauth2::http::HeaderValue;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	cache::TokenCache,
	config::ClientCredentialsSettings,
	error::ConfigError,
	http::TokenHttpClient,
	obs::{self, FetchOp},
};

/// Service-token acquisition, either configured or explicitly unavailable.
pub enum ServiceTokens<C>
where
	C: TokenHttpClient,
{
	/// Client credentials are configured and tokens come from the wrapped cache.
	Available(TokenCache<C>),
	/// At least one required setting is absent.
	Unavailable {
		/// Required settings that were absent or blank.
		missing: Vec<&'static str>,
	},
}
impl<C> ServiceTokens<C>
where
	C: TokenHttpClient,
{
	/// Resolves `settings` once at startup.
	///
	/// Absent required fields produce [`ServiceTokens::Unavailable`]. Settings that are present
	/// but invalid (an unparsable URL, a malformed scope) are configuration errors.
	pub fn from_settings(
		settings: ClientCredentialsSettings,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self, ConfigError> {
		let missing = settings.missing_fields();

		if !missing.is_empty() {
			obs::trace_decision(FetchOp::Token, "client_credentials_unavailable");

			return Ok(Self::Unavailable { missing });
		}

		Ok(Self::Available(TokenCache::with_http_client(settings.resolve()?, http_client)))
	}

	/// Returns `true` when client credentials are configured.
	pub fn is_available(&self) -> bool {
		matches!(self, Self::Available(_))
	}

	/// Underlying cache, when available.
	pub fn cache(&self) -> Option<&TokenCache<C>> {
		match self {
			Self::Available(cache) => Some(cache),
			Self::Unavailable { .. } => None,
		}
	}

	/// Settings that kept acquisition from being activated; empty when available.
	pub fn missing(&self) -> &[&'static str] {
		match self {
			Self::Available(_) => &[],
			Self::Unavailable { missing } => missing,
		}
	}

	/// Returns a valid service token.
	pub async fn get_token(&self) -> Result<TokenSecret> {
		match self {
			Self::Available(cache) => cache.get_token().await,
			Self::Unavailable { .. } => Err(ConfigError::NotConfigured.into()),
		}
	}

	/// Returns an `Authorization` header value carrying a valid service token.
	pub async fn authorization_header(&self) -> Result<HeaderValue> {
		bearer_header(&self.get_token().await?)
	}

	/// Drops the cached token after the platform API rejected it with `401`.
	///
	/// No-op when unavailable.
	pub fn invalidate(&self) {
		if let Self::Available(cache) = self {
			cache.clear_cache();
		}
	}
}
impl<C> From<TokenCache<C>> for ServiceTokens<C>
where
	C: TokenHttpClient,
{
	fn from(cache: TokenCache<C>) -> Self {
		Self::Available(cache)
	}
}
impl<C> Clone for ServiceTokens<C>
where
	C: TokenHttpClient,
{
	fn clone(&self) -> Self {
		match self {
			Self::Available(cache) => Self::Available(cache.clone()),
			Self::Unavailable { missing } => Self::Unavailable { missing: missing.clone() },
		}
	}
}
impl<C> Debug for ServiceTokens<C>
where
	C: TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Available(cache) => f.debug_tuple("Available").field(cache).finish(),
			Self::Unavailable { missing } =>
				f.debug_struct("Unavailable").field("missing", missing).finish(),
		}
	}
}

/// Renders `Bearer <token>` as a sensitive header value.
pub fn bearer_header(token: &TokenSecret) -> Result<HeaderValue> {
	let mut value =
		HeaderValue::from_str(&format!("Bearer {}", token.expose())).map_err(ConfigError::from)?;

	value.set_sensitive(true);

	Ok(value)
}
