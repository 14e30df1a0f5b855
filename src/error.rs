//! Crate-level error types shared by the token cache, configuration, and JWKS layers.
//!
//! Every type here is `Clone`: a single failed token fetch is handed to every caller that was
//! waiting on it, so sources are kept behind [`Arc`] instead of `Box`.

// self
use crate::{_prelude::*, auth::ScopeValidationError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS) while reaching the token endpoint.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token endpoint answered, but not with a usable token.
	#[error(transparent)]
	Endpoint(#[from] EndpointError),
	/// JWKS retrieval or token verification failure.
	#[error(transparent)]
	Jwks(#[from] JwksError),
}
impl Error {
	/// Returns `true` when a later attempt may succeed without operator intervention.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(_) | Self::Endpoint(_))
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// Service-token acquisition is not activated for this process.
	#[error("Client credentials not configured.")]
	NotConfigured,
	/// A required client-credentials setting is absent.
	#[error("Client credentials setting `{field}` is missing.")]
	MissingField {
		/// Configuration key that was not supplied.
		field: &'static str,
	},
	/// Token URL cannot be parsed.
	#[error("Token URL is invalid.")]
	InvalidTokenUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token URL uses a scheme other than `http`/`https`.
	#[error("Token URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// A configured scope is not a valid scope token.
	#[error("Configured scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	HttpRequest {
		/// Underlying `http` builder failure.
		#[source]
		source: SharedError,
	},
	/// A header value (for example the bearer authorization) is not valid ASCII.
	#[error("Header value is invalid.")]
	InvalidHeader {
		/// Underlying header validation failure.
		#[source]
		source: SharedError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { source: Arc::new(e) }
	}
}
impl From<oauth2::http::header::InvalidHeaderValue> for ConfigError {
	fn from(e: oauth2::http::header::InvalidHeaderValue) -> Self {
		Self::InvalidHeader { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Endpoint family being called (`token endpoint`, `JWKS endpoint`).
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling {target}.")]
	Io {
		/// Endpoint family being called.
		target: &'static str,
		/// IO failure.
		#[source]
		source: Arc<std::io::Error>,
	},
	/// Transport reported a failure that only carries a message.
	#[error("HTTP client error occurred while calling {target}: {message}.")]
	Other {
		/// Endpoint family being called.
		target: &'static str,
		/// Transport-supplied message.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(target: &'static str, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { target, source: Arc::new(src) }
	}
}

/// Token endpoint responses that did not yield a token.
#[derive(Clone, Debug, ThisError)]
pub enum EndpointError {
	/// Non-2xx status; the response body is kept for diagnostics.
	#[error("Token request failed: status {}: {body}", status_line(.status))]
	Status {
		/// HTTP status code.
		status: u16,
		/// Response body decoded as (lossy) UTF-8.
		body: String,
	},
	/// 2xx response whose JSON body could not be parsed as a token response.
	#[error("Token endpoint returned malformed JSON (status {status}).")]
	MalformedResponse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code.
		status: u16,
	},
	/// 2xx response carrying an empty `access_token`.
	#[error("Token endpoint returned an empty access token.")]
	EmptyAccessToken,
}

/// JWKS retrieval and end-user token verification failures.
#[derive(Clone, Debug, ThisError)]
pub enum JwksError {
	/// JWKS endpoint returned a non-2xx status.
	#[error("JWKS request to {url} failed: status {}.", status_line(.status))]
	Status {
		/// JWKS URL.
		url: String,
		/// HTTP status code.
		status: u16,
	},
	/// JWKS body is not a valid key set.
	#[error("JWKS document at {url} is malformed.")]
	Malformed {
		/// JWKS URL.
		url: String,
		/// JSON parsing failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
	/// Presented token header does not name a key.
	#[error("Token header does not carry a key id.")]
	MissingKeyId,
	/// No key in the set matches the presented key id.
	#[error("No JWKS key matches key id `{kid}`.")]
	UnknownKey {
		/// Key id taken from the token header.
		kid: String,
	},
	/// Signature or claim validation failed.
	#[error("Token verification failed.")]
	Verification {
		/// Underlying `jsonwebtoken` failure.
		#[source]
		source: Arc<jsonwebtoken::errors::Error>,
	},
}
impl From<jsonwebtoken::errors::Error> for JwksError {
	fn from(e: jsonwebtoken::errors::Error) -> Self {
		Self::Verification { source: Arc::new(e) }
	}
}

fn status_line(status: &u16) -> String {
	let reason = oauth2::http::StatusCode::from_u16(*status)
		.ok()
		.and_then(|code| code.canonical_reason());

	match reason {
		Some(reason) => format!("{status} {reason}"),
		None => status.to_string(),
	}
}
