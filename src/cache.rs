//! Single-flight, expiry-aware cache for the service's client-credentials token.
//!
//! [`TokenCache::get_token`] serves the cached token while it is usable and otherwise joins, or
//! starts, the one in-flight exchange. Every caller that overlaps a fetch observes that fetch's
//! single outcome. Deciding whether to serve, join, or start happens in one synchronous critical
//! section, so two callers can never both start a fetch. The fetch itself installs its result
//! and clears the in-flight marker in one step when it settles, success or failure alike, so a
//! failure never poisons the cache.

pub mod exchange;

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	clock::{Clock, SystemClock},
	config::ClientCredentialsConfig,
	http::TokenHttpClient,
	obs::{self, FetchOp},
	token::CachedToken,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

type FetchFuture = Shared<BoxFuture<'static, Result<TokenSecret>>>;

#[cfg(feature = "reqwest")]
/// Token cache specialized for the crate's default reqwest transport.
pub type ReqwestTokenCache = TokenCache<ReqwestHttpClient>;

/// Observable lifecycle state of a [`TokenCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheState {
	/// No usable token and no fetch in progress.
	Cold,
	/// A usable token is cached and no fetch is in progress.
	Warm,
	/// A fetch is in progress; a stale token may still be cached alongside it.
	Refreshing,
}

/// Shares one client-credentials token across every caller in the process.
///
/// Cloning is cheap and clones share the same cache.
pub struct TokenCache<C>
where
	C: TokenHttpClient,
{
	inner: Arc<Inner<C>>,
}
impl<C> TokenCache<C>
where
	C: TokenHttpClient,
{
	/// Creates a cache that reuses the caller-provided transport and the system clock.
	pub fn with_http_client(
		config: ClientCredentialsConfig,
		http_client: impl Into<Arc<C>>,
	) -> Self {
		Self::from_parts(config, http_client, Arc::new(SystemClock))
	}

	/// Creates a cache from a transport and an explicit time source.
	pub fn from_parts(
		config: ClientCredentialsConfig,
		http_client: impl Into<Arc<C>>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				config: Arc::new(config),
				http_client: http_client.into(),
				clock,
				slot: Default::default(),
				next_fetch_id: AtomicU64::new(0),
			}),
		}
	}

	/// Returns a currently valid bearer token, fetching a new one if needed.
	///
	/// The hot path (a usable cached token) performs no I/O. Otherwise the caller awaits the
	/// single in-flight exchange, starting it if none is running; a failed exchange is reported
	/// to every caller that awaited it, and the next call starts a fresh one.
	pub async fn get_token(&self) -> Result<TokenSecret> {
		let fetch = {
			let mut slot = self.inner.slot.lock();
			let now = self.inner.clock.now();

			if let Some(token) = slot.cached.as_ref().filter(|token| token.is_usable_at(now)) {
				obs::trace_decision(FetchOp::Token, "cache_hit");

				return Ok(token.access_token().clone());
			}

			match slot.in_flight.as_ref().map(|in_flight| in_flight.future.clone()) {
				Some(future) => {
					obs::trace_decision(FetchOp::Token, "join_in_flight");

					future
				},
				None => {
					obs::trace_decision(FetchOp::Token, "start_fetch");

					let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
					let future = self.inner.start_fetch(id);

					slot.in_flight = Some(InFlightFetch { id, future: future.clone() });

					future
				},
			}
		};

		fetch.await
	}

	/// Discards the cached token so the next [`get_token`](Self::get_token) fetches a new one.
	///
	/// A fetch already in progress is not cancelled; it still completes and installs its result.
	pub fn clear_cache(&self) {
		self.inner.slot.lock().cached = None;

		obs::trace_decision(FetchOp::Token, "cache_cleared");
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CacheState {
		let slot = self.inner.slot.lock();
		let now = self.inner.clock.now();

		if slot.in_flight.is_some() {
			CacheState::Refreshing
		} else if slot.cached.as_ref().is_some_and(|token| token.is_usable_at(now)) {
			CacheState::Warm
		} else {
			CacheState::Cold
		}
	}

	/// Expiry of the cached token, if one is held (usable or not).
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.inner.slot.lock().cached.as_ref().map(CachedToken::expires_at)
	}

	/// Configuration the cache was built from.
	pub fn config(&self) -> &ClientCredentialsConfig {
		&self.inner.config
	}
}
#[cfg(feature = "reqwest")]
impl TokenCache<ReqwestHttpClient> {
	/// Creates a cache with its own default reqwest transport.
	pub fn new(config: ClientCredentialsConfig) -> Self {
		Self::with_http_client(config, ReqwestHttpClient::default())
	}
}
impl<C> Clone for TokenCache<C>
where
	C: TokenHttpClient,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<C> Debug for TokenCache<C>
where
	C: TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("config", &self.inner.config)
			.field("state", &self.state())
			.finish()
	}
}

struct Inner<C>
where
	C: TokenHttpClient,
{
	config: Arc<ClientCredentialsConfig>,
	http_client: Arc<C>,
	clock: Arc<dyn Clock>,
	slot: Mutex<CacheSlot>,
	next_fetch_id: AtomicU64,
}
impl<C> Inner<C>
where
	C: TokenHttpClient,
{
	// Must be called with the slot lock held so the returned future is registered atomically.
	// The slot owns the returned future, so the future may only reach back into `self` weakly.
	fn start_fetch(self: &Arc<Self>, id: u64) -> FetchFuture {
		let inner = Arc::downgrade(self);
		let http_client = self.http_client.clone();
		let config = self.config.clone();
		let clock = self.clock.clone();

		async move {
			let result =
				exchange::fetch_new_token(http_client.as_ref(), &config, clock.as_ref()).await;

			Self::settle_weak(&inner, id, result)
		}
		.boxed()
		.shared()
	}

	fn settle_weak(
		inner: &Weak<Self>,
		id: u64,
		result: Result<CachedToken>,
	) -> Result<TokenSecret> {
		match inner.upgrade() {
			Some(inner) => inner.settle(id, result),
			None => result.map(|token| token.access_token().clone()),
		}
	}

	fn settle(&self, id: u64, result: Result<CachedToken>) -> Result<TokenSecret> {
		let mut slot = self.slot.lock();

		if slot.in_flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
			slot.in_flight = None;
		}

		let token = result?;
		let access_token = token.access_token().clone();

		slot.cached = Some(token);

		Ok(access_token)
	}
}

#[derive(Default)]
struct CacheSlot {
	cached: Option<CachedToken>,
	in_flight: Option<InFlightFetch>,
}

struct InFlightFetch {
	id: u64,
	future: FetchFuture,
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
	// self
	use super::*;
	use crate::{clock::ManualClock, error::EndpointError};

	#[derive(Debug, ThisError)]
	#[error("Scripted transport failure.")]
	struct ScriptedError;

	/// Transport that answers from a script and counts calls, optionally pausing first.
	#[derive(Clone, Default)]
	struct ScriptedClient {
		calls: Arc<AtomicUsize>,
		replies: Arc<Mutex<Vec<(u16, String)>>>,
		delay: Option<std::time::Duration>,
	}
	impl ScriptedClient {
		fn replying(replies: impl IntoIterator<Item = (u16, String)>) -> Self {
			let mut replies = replies.into_iter().collect::<Vec<_>>();

			replies.reverse();

			Self { replies: Arc::new(Mutex::new(replies)), ..Default::default() }
		}

		fn with_delay(mut self, delay: std::time::Duration) -> Self {
			self.delay = Some(delay);

			self
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl TokenHttpClient for ScriptedClient {
		type Handle = ScriptedClient;
		type TransportError = ScriptedError;

		fn handle(&self) -> Self::Handle {
			self.clone()
		}
	}
	impl<'c> AsyncHttpClient<'c> for ScriptedClient {
		type Error = HttpClientError<ScriptedError>;
		type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

		fn call(&'c self, _request: HttpRequest) -> Self::Future {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}

				let (status, body) = self
					.replies
					.lock()
					.pop()
					.ok_or_else(|| HttpClientError::Reqwest(Box::new(ScriptedError)))?;
				let mut response = HttpResponse::new(body.into_bytes());

				*response.status_mut() =
					oauth2::http::StatusCode::from_u16(status).expect("Scripted status is valid.");

				Ok(response)
			})
		}
	}

	fn config() -> ClientCredentialsConfig {
		ClientCredentialsConfig::new(
			"svc",
			"secret",
			Url::parse("https://idp.example.com/token").expect("URL should parse."),
			Vec::<String>::new(),
		)
		.expect("Config should be valid.")
	}

	fn ok_body(access_token: &str, expires_in: i64) -> (u16, String) {
		let body = format!(r#"{{"access_token":"{access_token}","expires_in":{expires_in}}}"#);

		(200, body)
	}

	fn jwt_with_exp(exp: i64) -> String {
		format!(
			"{}.{}.sig",
			URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
			URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
		)
	}

	fn jwt_expiring_at(exp: OffsetDateTime) -> String {
		jwt_with_exp(exp.unix_timestamp())
	}

	fn cache(client: &ScriptedClient, clock: &ManualClock) -> TokenCache<ScriptedClient> {
		TokenCache::from_parts(config(), client.clone(), Arc::new(clock.clone()))
	}

	#[tokio::test]
	async fn cold_cache_fetches_then_serves_from_memory() {
		let client = ScriptedClient::replying([ok_body("first", 3_600)]);
		let clock = ManualClock::starting_now();
		let cache = cache(&client, &clock);

		assert_eq!(cache.state(), CacheState::Cold);

		let first = cache.get_token().await.expect("Cold fetch should succeed.");
		let second = cache.get_token().await.expect("Warm read should succeed.");

		assert_eq!(first.expose(), "first");
		assert_eq!(second, first);
		assert_eq!(client.calls(), 1);
		assert_eq!(cache.state(), CacheState::Warm);
		assert_eq!(cache.expires_at(), Some(clock.now() + Duration::hours(1)));
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_fetch() {
		let client = ScriptedClient::replying([ok_body("shared", 3_600)])
			.with_delay(std::time::Duration::from_millis(50));
		let cache = cache(&client, &ManualClock::starting_now());
		let tasks = (0..16)
			.map(|_| {
				let cache = cache.clone();

				tokio::spawn(async move { cache.get_token().await })
			})
			.collect::<Vec<_>>();

		for task in tasks {
			let token = task.await.expect("Task should not panic.").expect("Fetch should succeed.");

			assert_eq!(token.expose(), "shared");
		}

		assert_eq!(client.calls(), 1);
	}

	#[tokio::test]
	async fn validity_window_respects_buffer() {
		let clock = ManualClock::starting_now();
		let jwt = jwt_expiring_at(clock.now() + Duration::seconds(120));
		let client = ScriptedClient::replying([
			(200, format!(r#"{{"access_token":"{jwt}","expires_in":120}}"#)),
			ok_body("renewed", 3_600),
		]);
		let cache = cache(&client, &clock);

		cache.get_token().await.expect("Initial fetch should succeed.");
		cache.get_token().await.expect("Token with 120s left should be served.");

		assert_eq!(client.calls(), 1);

		clock.advance(Duration::seconds(90));

		assert_eq!(cache.state(), CacheState::Cold);

		let renewed = cache.get_token().await.expect("Token inside the buffer should be renewed.");

		assert_eq!(renewed.expose(), "renewed");
		assert_eq!(client.calls(), 2);
	}

	#[tokio::test]
	async fn failures_fan_out_and_do_not_poison() {
		let client = ScriptedClient::replying([
			(500, "boom".to_string()),
			ok_body("recovered", 3_600),
		])
		.with_delay(std::time::Duration::from_millis(20));
		let cache = cache(&client, &ManualClock::starting_now());
		let (a, b, c) = tokio::join!(cache.get_token(), cache.get_token(), cache.get_token());

		for result in [a, b, c] {
			let err = result.expect_err("Every waiter should observe the failure.");

			assert!(matches!(err, Error::Endpoint(EndpointError::Status { status: 500, .. })));
			assert!(err.to_string().contains("boom"));
		}

		assert_eq!(client.calls(), 1);
		assert_eq!(cache.state(), CacheState::Cold);

		let token = cache.get_token().await.expect("Next call should retry and succeed.");

		assert_eq!(token.expose(), "recovered");
		assert_eq!(client.calls(), 2);
	}

	#[tokio::test]
	async fn clear_cache_forces_exactly_one_new_fetch() {
		let client = ScriptedClient::replying([ok_body("old", 3_600), ok_body("new", 3_600)]);
		let cache = cache(&client, &ManualClock::starting_now());

		cache.get_token().await.expect("Initial fetch should succeed.");
		cache.clear_cache();

		assert_eq!(cache.state(), CacheState::Cold);
		assert_eq!(cache.expires_at(), None);

		let (a, b) = tokio::join!(cache.get_token(), cache.get_token());

		assert_eq!(a.expect("Refetch should succeed.").expose(), "new");
		assert_eq!(b.expect("Refetch should succeed.").expose(), "new");
		assert_eq!(client.calls(), 2);
	}

	#[tokio::test]
	async fn clear_cache_does_not_cancel_in_flight_fetch() {
		let client = ScriptedClient::replying([ok_body("in-flight", 3_600)])
			.with_delay(std::time::Duration::from_millis(50));
		let cache = cache(&client, &ManualClock::starting_now());
		let waiter = {
			let cache = cache.clone();

			tokio::spawn(async move { cache.get_token().await })
		};

		while cache.state() != CacheState::Refreshing {
			tokio::task::yield_now().await;
		}

		cache.clear_cache();

		let token = waiter.await.expect("Task should not panic.").expect("Fetch should succeed.");

		assert_eq!(token.expose(), "in-flight");
		assert_eq!(cache.state(), CacheState::Warm);
		assert_eq!(
			cache.get_token().await.expect("Installed token is served.").expose(),
			"in-flight"
		);
		assert_eq!(client.calls(), 1);
	}

	#[tokio::test]
	async fn failed_refresh_keeps_stale_token_unserved() {
		let clock = ManualClock::starting_now();
		let client = ScriptedClient::replying([ok_body("stale", 120), (503, "down".to_string())]);
		let cache = cache(&client, &clock);

		cache.get_token().await.expect("Initial fetch should succeed.");
		clock.advance(Duration::seconds(100));

		let err = cache.get_token().await.expect_err("Refresh failure should propagate.");

		assert!(err.is_retryable());
		assert!(cache.expires_at().is_some());
		assert_eq!(cache.state(), CacheState::Cold);
	}

	#[tokio::test]
	async fn abandoned_fetch_is_resumed_by_the_next_caller() {
		let client = ScriptedClient::replying([ok_body("resumed", 3_600)])
			.with_delay(std::time::Duration::from_millis(30));
		let cache = cache(&client, &ManualClock::starting_now());
		let abandoned =
			tokio::time::timeout(std::time::Duration::from_millis(5), cache.get_token()).await;

		assert!(abandoned.is_err(), "The first caller should give up before the fetch settles.");
		assert_eq!(cache.state(), CacheState::Refreshing);

		let token = cache.get_token().await.expect("Next caller should drive the same fetch.");

		assert_eq!(token.expose(), "resumed");
		assert_eq!(client.calls(), 1);
	}

	#[tokio::test]
	async fn dropping_the_cache_releases_an_abandoned_fetch() {
		let client = Arc::new(
			ScriptedClient::replying([ok_body("never-read", 3_600)])
				.with_delay(std::time::Duration::from_secs(30)),
		);
		let cache = TokenCache::<ScriptedClient>::from_parts(
			config(),
			client.clone(),
			Arc::new(ManualClock::starting_now()),
		);
		let abandoned =
			tokio::time::timeout(std::time::Duration::from_millis(5), cache.get_token()).await;

		assert!(abandoned.is_err(), "The caller should give up while the fetch is pending.");
		assert_eq!(cache.state(), CacheState::Refreshing);
		assert!(Arc::strong_count(&client) > 1);

		drop(cache);

		assert_eq!(Arc::strong_count(&client), 1);
	}

	#[tokio::test]
	async fn earliest_representable_exp_never_wedges_the_cache() {
		let jwt = jwt_with_exp(-377_705_116_800);
		let client = ScriptedClient::replying([
			(200, format!(r#"{{"access_token":"{jwt}","expires_in":3600}}"#)),
			ok_body("unused", 3_600),
		]);
		let clock = ManualClock::starting_now();
		let cache = cache(&client, &clock);

		for _ in 0..3 {
			let token = cache.get_token().await.expect("Token should be served from expires_in.");

			assert_eq!(token.expose(), jwt);
		}

		assert_eq!(client.calls(), 1);
		assert_eq!(cache.state(), CacheState::Warm);
		assert_eq!(cache.expires_at(), Some(clock.now() + Duration::hours(1)));
	}
}
