//! Cached token records, token-endpoint response parsing, and expiry derivation.
//!
//! Expiry is taken from the access token's own `exp` claim whenever the token is a decodable JWT.
//! `expires_in` is only a fallback: it is relative to when the endpoint generated the response,
//! so trusting it would over-estimate validity by however long the response spent in transit.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
// self
use crate::{_prelude::*, auth::TokenSecret, error::EndpointError};

/// Safety margin subtracted from a token's expiry before it is considered unusable.
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::seconds(60);

// Ten years; anything larger is treated as a provider bug rather than a real lifetime.
const MAX_EXPIRES_IN_SECS: f64 = 315_360_000.;

/// Where a [`CachedToken`]'s expiry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpirySource {
	/// The access token's JWT `exp` claim.
	JwtClaim,
	/// `now + expires_in`, used when the token is opaque or carries no `exp`.
	ExpiresIn,
}
impl ExpirySource {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ExpirySource::JwtClaim => "jwt_claim",
			ExpirySource::ExpiresIn => "expires_in",
		}
	}
}
impl Display for ExpirySource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A bearer token together with the instant it stops being valid.
///
/// Records are replaced wholesale on every refresh; nothing mutates one in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedToken {
	access_token: TokenSecret,
	expires_at: OffsetDateTime,
	expiry_source: ExpirySource,
}
impl CachedToken {
	/// Creates a record.
	pub fn new(
		access_token: TokenSecret,
		expires_at: OffsetDateTime,
		expiry_source: ExpirySource,
	) -> Self {
		Self { access_token, expires_at, expiry_source }
	}

	/// Builds a record from a freshly received token response, received at `now`.
	pub fn from_response(response: TokenResponse, now: OffsetDateTime) -> Self {
		let (expires_at, expiry_source) =
			derive_expiry(response.access_token.expose(), response.expires_in, now);

		Self::new(response.access_token, expires_at, expiry_source)
	}

	/// The bearer token value.
	pub fn access_token(&self) -> &TokenSecret {
		&self.access_token
	}

	/// Absolute expiry instant.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Where the expiry instant came from.
	pub fn expiry_source(&self) -> ExpirySource {
		self.expiry_source
	}

	/// Returns `true` if the token may still be served at `now`, honoring
	/// [`TOKEN_EXPIRY_BUFFER`].
	///
	/// An expiry too close to the representable minimum to subtract the buffer from is never
	/// usable.
	pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at.checked_sub(TOKEN_EXPIRY_BUFFER).is_some_and(|deadline| now < deadline)
	}
}

/// Successful token-endpoint response body.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
	/// Issued access token.
	pub access_token: TokenSecret,
	/// Token type (normally `Bearer`).
	#[serde(default)]
	pub token_type: Option<String>,
	/// Lifetime in seconds relative to when the endpoint produced the response.
	#[serde(default)]
	pub expires_in: Option<f64>,
	/// Granted scopes, if the endpoint echoes them.
	#[serde(default)]
	pub scope: Option<String>,
}
impl TokenResponse {
	/// Parses a 2xx response body; `status` is kept for diagnostics.
	pub fn parse(status: u16, body: &[u8]) -> Result<Self, EndpointError> {
		let deserializer = &mut serde_json::Deserializer::from_slice(body);
		let response: Self = serde_path_to_error::deserialize(deserializer)
			.map_err(|e| EndpointError::MalformedResponse { source: Arc::new(e), status })?;

		if response.access_token.is_empty() {
			return Err(EndpointError::EmptyAccessToken);
		}

		Ok(response)
	}
}

/// Derives the expiry for `access_token`, preferring its JWT `exp` claim.
///
/// Falls back to `now + expires_in`; a missing, negative, or non-finite `expires_in` counts as
/// zero, which makes the token stale immediately.
pub fn derive_expiry(
	access_token: &str,
	expires_in: Option<f64>,
	now: OffsetDateTime,
) -> (OffsetDateTime, ExpirySource) {
	if let Some(exp) = decode_jwt_exp(access_token) {
		return (exp, ExpirySource::JwtClaim);
	}

	let secs = expires_in
		.filter(|secs| secs.is_finite() && *secs > 0.)
		.map(|secs| secs.min(MAX_EXPIRES_IN_SECS))
		.unwrap_or_default();

	(now + Duration::seconds_f64(secs), ExpirySource::ExpiresIn)
}

/// Best-effort read of the `exp` claim from a compact JWS/JWT, without verifying it.
///
/// Returns `None` for anything that is not a three-part base64url token with a JSON object
/// payload carrying a numeric `exp`, and for an `exp` so early that [`TOKEN_EXPIRY_BUFFER`]
/// cannot be subtracted from it.
pub fn decode_jwt_exp(token: &str) -> Option<OffsetDateTime> {
	read_exp_claim(token).filter(|exp| exp.checked_sub(TOKEN_EXPIRY_BUFFER).is_some())
}

fn read_exp_claim(token: &str) -> Option<OffsetDateTime> {
	let mut parts = token.split('.');
	let (Some(_header), Some(payload), Some(_signature), None) =
		(parts.next(), parts.next(), parts.next(), parts.next())
	else {
		return None;
	};
	let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
	let claims: Value = serde_json::from_slice(&bytes).ok()?;
	let exp = claims.as_object()?.get("exp")?;

	if let Some(secs) = exp.as_i64() {
		return OffsetDateTime::from_unix_timestamp(secs).ok();
	}

	let secs = exp.as_f64().filter(|secs| secs.is_finite())?;
	let millis = (secs * 1_000.).round() as i128;

	OffsetDateTime::from_unix_timestamp_nanos(millis.checked_mul(1_000_000)?).ok()
}
