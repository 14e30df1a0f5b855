//! Service-to-service OAuth 2.0 tokens for the OpenChoreo platform API: a single-flight,
//! expiry-aware client-credentials cache plus the JWKS helpers used to verify end-user tokens.
//!
//! The usual entry point is [`service::ServiceTokens`], which resolves
//! [`config::ClientCredentialsSettings`] once at startup and either wraps a
//! [`cache::TokenCache`] or reports that service-token acquisition is unavailable.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod jwks;
pub mod obs;
pub mod service;
pub mod token;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use jsonwebtoken;
pub use oauth2;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
