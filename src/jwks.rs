//! JWKS discovery, caching, and verification of end-user tokens.
//!
//! Key sets are cached per URL for [`DEFAULT_JWKS_TTL`] unless configured otherwise. A token
//! whose `kid` is missing from a cached set triggers one refetch that bypasses the TTL, which
//! picks up key rotation without refetching on every verification.

// crates.io
use jsonwebtoken::{DecodingKey, Validation, jwk::JwkSet};
use oauth2::http::{Method, Request, header::ACCEPT};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	error::{ConfigError, JwksError},
	http::{self, TokenHttpClient},
	obs::{self, FetchOp, FetchOutcome, FetchSpan},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// How long a fetched key set is served before it is fetched again.
pub const DEFAULT_JWKS_TTL: Duration = Duration::minutes(5);
/// Well-known path of the key set relative to the identity provider's origin.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

const TARGET: &str = "JWKS endpoint";

/// Derives the JWKS URL from a token URL by replacing its path with [`JWKS_PATH`].
///
/// Query and fragment are dropped; scheme, host, and port are kept.
pub fn jwks_url_for(token_url: &Url) -> Url {
	let mut url = token_url.clone();

	url.set_path(JWKS_PATH);
	url.set_query(None);
	url.set_fragment(None);

	url
}

/// Per-URL key-set cache with TTL expiry.
///
/// Cloning is cheap and clones share the same entries.
pub struct JwksCache<C>
where
	C: TokenHttpClient,
{
	inner: Arc<JwksInner<C>>,
}
impl<C> JwksCache<C>
where
	C: TokenHttpClient,
{
	/// Creates a cache with the default TTL and the system clock.
	pub fn with_http_client(http_client: impl Into<Arc<C>>) -> Self {
		Self::from_parts(http_client, Arc::new(SystemClock), DEFAULT_JWKS_TTL)
	}

	/// Creates a cache from a transport, a time source, and a TTL.
	pub fn from_parts(
		http_client: impl Into<Arc<C>>,
		clock: Arc<dyn Clock>,
		ttl: Duration,
	) -> Self {
		Self {
			inner: Arc::new(JwksInner {
				http_client: http_client.into(),
				clock,
				ttl,
				entries: Default::default(),
				fetch_guards: Default::default(),
			}),
		}
	}

	/// TTL applied to every entry.
	pub fn ttl(&self) -> Duration {
		self.inner.ttl
	}

	/// Returns the key set published at `url`, from cache while it is younger than the TTL.
	///
	/// Concurrent misses for the same URL are serialized so only one request goes out; the
	/// others re-check the cache once it lands.
	pub async fn fetch(&self, url: &Url) -> Result<Arc<JwkSet>> {
		if let Some(keys) = self.fresh(url) {
			obs::trace_decision(FetchOp::Jwks, "cache_hit");

			return Ok(keys);
		}

		let guard = self.fetch_guard(url);
		let result = {
			let _lock = guard.lock().await;

			match self.fresh(url) {
				Some(keys) => Ok(keys),
				None => self.download_and_store(url).await,
			}
		};

		self.release_guard(url, guard);

		result
	}

	/// Verifies `token` against the key set at `url` and returns its claims.
	///
	/// The key is chosen by the token header's `kid`. A `kid` absent from the cached set causes
	/// one refetch before the token is rejected.
	pub async fn verify<T>(&self, url: &Url, token: &str, validation: &Validation) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let header = jsonwebtoken::decode_header(token).map_err(JwksError::from)?;
		let kid = header.kid.ok_or(JwksError::MissingKeyId)?;
		let mut keys = self.fetch(url).await?;

		if keys.find(&kid).is_none() {
			obs::trace_decision(FetchOp::Jwks, "kid_miss");

			keys = self.refetch(url, &keys).await?;
		}

		let jwk = keys.find(&kid).ok_or_else(|| JwksError::UnknownKey { kid: kid.clone() })?;
		let key = DecodingKey::from_jwk(jwk).map_err(JwksError::from)?;
		let data = jsonwebtoken::decode::<T>(token, &key, validation).map_err(JwksError::from)?;

		Ok(data.claims)
	}

	/// Drops the cached entry for `url`, if any.
	pub fn invalidate(&self, url: &Url) {
		self.inner.entries.lock().remove(url);
	}

	// Replaces `stale` unless another task already stored a different set while this one waited
	// for the guard.
	async fn refetch(&self, url: &Url, stale: &Arc<JwkSet>) -> Result<Arc<JwkSet>> {
		let guard = self.fetch_guard(url);
		let result = {
			let _lock = guard.lock().await;
			let stored = self.inner.entries.lock().get(url).map(|entry| entry.keys.clone());

			match stored {
				Some(keys) if !Arc::ptr_eq(&keys, stale) => {
					obs::trace_decision(FetchOp::Jwks, "join_refetch");

					Ok(keys)
				},
				_ => self.download_and_store(url).await,
			}
		};

		self.release_guard(url, guard);

		result
	}

	fn fresh(&self, url: &Url) -> Option<Arc<JwkSet>> {
		let now = self.inner.clock.now();

		self.inner
			.entries
			.lock()
			.get(url)
			.filter(|entry| now - entry.fetched_at < self.inner.ttl)
			.map(|entry| entry.keys.clone())
	}

	fn fetch_guard(&self, url: &Url) -> Arc<AsyncMutex<()>> {
		let mut guards = self.inner.fetch_guards.lock();

		guards.entry(url.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	// Drops the map's guard once no other task holds a clone of it.
	fn release_guard(&self, url: &Url, guard: Arc<AsyncMutex<()>>) {
		let mut guards = self.inner.fetch_guards.lock();

		if guards.get(url).is_some_and(|held| Arc::ptr_eq(held, &guard))
			&& Arc::strong_count(&guard) == 2
		{
			guards.remove(url);
		}
	}

	async fn download_and_store(&self, url: &Url) -> Result<Arc<JwkSet>> {
		let keys = Arc::new(self.download(url).await?);

		self.inner.entries.lock().insert(
			url.clone(),
			JwksEntry { keys: keys.clone(), fetched_at: self.inner.clock.now() },
		);

		Ok(keys)
	}

	async fn download(&self, url: &Url) -> Result<JwkSet> {
		const OP: FetchOp = FetchOp::Jwks;

		let span = FetchSpan::new(OP, "download");

		obs::record_fetch_outcome(OP, FetchOutcome::Attempt);

		let result = span
			.instrument(async {
				let request = Request::builder()
					.method(Method::GET)
					.uri(url.as_str())
					.header(ACCEPT, "application/json")
					.body(Vec::new())
					.map_err(ConfigError::from)?;
				let response =
					http::execute(self.inner.http_client.as_ref(), TARGET, request).await?;
				let status = response.status();

				if !status.is_success() {
					return Err(Error::from(JwksError::Status {
						url: url.to_string(),
						status: status.as_u16(),
					}));
				}

				serde_json::from_slice::<JwkSet>(response.body()).map_err(|e| {
					Error::from(JwksError::Malformed { url: url.to_string(), source: Arc::new(e) })
				})
			})
			.await;

		match &result {
			Ok(_) => obs::record_fetch_outcome(OP, FetchOutcome::Success),
			Err(_) => obs::record_fetch_outcome(OP, FetchOutcome::Failure),
		}

		result
	}
}
#[cfg(feature = "reqwest")]
impl JwksCache<ReqwestHttpClient> {
	/// Creates a cache with its own default reqwest transport.
	pub fn new() -> Self {
		Self::with_http_client(ReqwestHttpClient::default())
	}
}
#[cfg(feature = "reqwest")]
impl Default for JwksCache<ReqwestHttpClient> {
	fn default() -> Self {
		Self::new()
	}
}
impl<C> Clone for JwksCache<C>
where
	C: TokenHttpClient,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<C> Debug for JwksCache<C>
where
	C: TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwksCache")
			.field("ttl", &self.inner.ttl)
			.field("cached_urls", &self.inner.entries.lock().len())
			.field("fetch_guards", &self.inner.fetch_guards.lock().len())
			.finish()
	}
}

struct JwksInner<C>
where
	C: TokenHttpClient,
{
	http_client: Arc<C>,
	clock: Arc<dyn Clock>,
	ttl: Duration,
	entries: Mutex<HashMap<Url, JwksEntry>>,
	fetch_guards: Mutex<HashMap<Url, Arc<AsyncMutex<()>>>>,
}

struct JwksEntry {
	keys: Arc<JwkSet>,
	fetched_at: OffsetDateTime,
}
