//! Transport primitives for token-endpoint and JWKS requests.
//!
//! [`TokenHttpClient`] is the crate's only dependency on an HTTP stack. Requests and responses
//! use the `http` types re-exported by `oauth2` ([`HttpRequest`], [`HttpResponse`]), so any
//! client that can speak those types plugs in. [`ReqwestHttpClient`] is the default.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Abstraction over HTTP transports able to execute token-endpoint and JWKS requests.
///
/// Implementations must be `Send + Sync + 'static` because the token cache drives its single
/// in-flight fetch from a `'static` shared future. The handles they return own whatever state is
/// required, and their request futures must be `Send`, so that shared future stays `Send` too.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Short-lived [`AsyncHttpClient`] handle used for a single exchange.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle for one request.
	fn handle(&self) -> Self::Handle;

	/// Classifies a transport-specific failure; `target` names the endpoint family being called.
	///
	/// The default treats every failure as a network error.
	fn map_transport_error(&self, target: &'static str, error: Self::TransportError) -> Error {
		TransportError::network(target, error).into()
	}
}

/// Executes `request` through `client`, mapping transport failures into crate errors.
///
/// Only transport-level problems are errors here; any HTTP status is returned to the caller.
pub(crate) async fn execute<C>(
	client: &C,
	target: &'static str,
	request: HttpRequest,
) -> Result<HttpResponse>
where
	C: ?Sized + TokenHttpClient,
{
	let handle = client.handle();

	handle.call(request).await.map_err(|err| map_client_error(client, target, err))
}

fn map_client_error<C>(
	client: &C,
	target: &'static str,
	err: HttpClientError<C::TransportError>,
) -> Error
where
	C: ?Sized + TokenHttpClient,
{
	match err {
		HttpClientError::Reqwest(inner) => client.map_transport_error(target, *inner),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io { target, source: Arc::new(inner) }.into(),
		HttpClientError::Other(message) => TransportError::Other { target, message }.into(),
		_ => TransportError::Other { target, message: "unrecognized transport failure".into() }
			.into(),
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Token requests should not follow redirects: token endpoints return results directly instead
/// of delegating to another URI. Configure any custom [`ReqwestClient`] accordingly, along with
/// whatever request timeout the deployment wants for the token endpoint.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn handle(&self) -> Self::Handle {
		ReqwestHandle(self.0.clone())
	}

	fn map_transport_error(&self, target: &'static str, error: ReqwestError) -> Error {
		if error.is_builder() {
			return ConfigError::from(error).into();
		}

		TransportError::network(target, error).into()
	}
}

/// Handle returned by [`ReqwestHttpClient`] that satisfies [`TokenHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHandle(ReqwestClient);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			let response =
				self.0.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
