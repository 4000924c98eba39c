//! Credential lifecycle, resilient requests, and response caching for spreadsheet API clients.
//!
//! The crate covers the part of a spreadsheet client that has real failure and concurrency
//! hazards: delegated OAuth 2.0 and signed-assertion service identities with single-flight
//! token issuance, a retrying executor with status-driven classification and rate limiting,
//! and a TTL response cache that writes invalidate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

#[cfg(feature = "reqwest")] pub mod api;
pub mod assertion;
pub mod auth;
pub mod cache;
pub mod error;
pub mod flight;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		assertion::ServiceAccountKey,
		auth::ScopeSet,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::{DelegatedTokenProvider, OAuthClientConfig},
		store::{CredentialStore, MemoryStore},
	};

	/// PKCS#8 RSA private key used to sign test assertions.
	pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/service_account.pem");
	/// SPKI public key matching [`TEST_PRIVATE_KEY_PEM`].
	pub const TEST_PUBLIC_KEY_PEM: &str = include_str!("../tests/fixtures/service_account.pub.pem");
	/// Service identity used by test key fixtures.
	pub const TEST_SERVICE_EMAIL: &str = "robot@sheets-test.iam.gserviceaccount.com";

	/// Delegated provider type alias used by reqwest-backed integration tests.
	pub type ReqwestTestDelegated =
		DelegatedTokenProvider<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_client() -> ReqwestClient {
		ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.")
	}

	/// Wraps [`test_reqwest_client`] in the token transport used by providers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		ReqwestHttpClient::with_client(test_reqwest_client())
	}

	/// Builds a service-account key pointing at the provided token endpoint.
	pub fn test_service_account_key(token_uri: &str) -> ServiceAccountKey {
		let payload = serde_json::json!({
			"type": "service_account",
			"project_id": "sheets-test",
			"private_key_id": "test-key-1",
			"private_key": TEST_PRIVATE_KEY_PEM,
			"client_email": TEST_SERVICE_EMAIL,
			"client_id": "1234567890",
			"token_uri": token_uri,
		});

		ServiceAccountKey::from_json(payload.to_string().as_bytes())
			.expect("Test service account key should parse.")
	}

	/// Builds the delegated client configuration shared by reqwest-backed tests.
	pub fn delegated_test_config(
		authorization_endpoint: &str,
		token_endpoint: &str,
		client_id: &str,
		client_secret: &str,
	) -> OAuthClientConfig {
		OAuthClientConfig::builder(client_id)
			.client_secret(client_secret)
			.authorization_endpoint(
				Url::parse(authorization_endpoint)
					.expect("Failed to parse test authorization endpoint."),
			)
			.token_endpoint(Url::parse(token_endpoint).expect("Failed to parse test token endpoint."))
			.redirect_uri(
				Url::parse("https://app.example.com/callback")
					.expect("Failed to parse test redirect URI."),
			)
			.scope(
				ScopeSet::new([crate::auth::scope::SPREADSHEETS])
					.expect("Failed to build test scope set."),
			)
			.build()
			.expect("Test OAuth client config should build.")
	}

	/// Constructs a [`DelegatedTokenProvider`] backed by an in-memory store and the reqwest
	/// transport used across integration tests.
	pub fn build_delegated_test_provider(
		authorization_endpoint: &str,
		token_endpoint: &str,
		client_id: &str,
		client_secret: &str,
	) -> (ReqwestTestDelegated, Arc<MemoryStore>) {
		let config = delegated_test_config(
			authorization_endpoint,
			token_endpoint,
			client_id,
			client_secret,
		);
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let provider = DelegatedTokenProvider::with_http_client(
			config,
			store,
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		);

		(provider, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, HashSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
