//! Reqwest-backed request sender tying the executor, status mapping, and response cache
//! together.
//!
//! Reads go through [`ApiClient::read`]: a live cache entry short-circuits the network,
//! otherwise the executor fetches the value and it is cached unless a write raced the read.
//! Writes go through [`ApiClient::write`], which invalidates the cache whether or not the
//! write reported success, since a failed response does not prove the write did not land.

// crates.io
use reqwest::{Method, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	cache::{CacheKey, ResponseCache, WriteScope},
	error::{ConfigError, EndpointConfigError, TransientError, TransportError},
	http,
	provider::config::ensure_secure,
	retry::RetryingExecutor,
};

/// Base URL of the public spreadsheet API.
pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/";

const MESSAGE_PREVIEW_LIMIT: usize = 256;

/// One outbound API request, replayable across attempts.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	method: Method,
	path: String,
	query: Vec<(String, String)>,
	body: Option<serde_json::Value>,
}
impl ApiRequest {
	/// `GET` relative to the client's base URL.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` relative to the client's base URL.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` relative to the client's base URL.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, name: impl Into<String>, value: impl Display) -> Self {
		self.query.push((name.into(), value.to_string()));

		self
	}

	/// Sets a JSON body.
	pub fn json(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), query: Vec::new(), body: None }
	}
}

/// Spreadsheet API client with retries, pacing, and optional read caching.
#[derive(Debug)]
pub struct ApiClient {
	http: ReqwestClient,
	base_url: Url,
	executor: Arc<RetryingExecutor>,
	cache: Option<Arc<ResponseCache>>,
}
impl ApiClient {
	/// Creates a client for the public API endpoint.
	pub fn new(executor: Arc<RetryingExecutor>) -> Result<Self> {
		let base_url = Url::parse(SHEETS_API_BASE)
			.map_err(|source| EndpointConfigError::InvalidUrl { field: "base_url", source })
			.map_err(ConfigError::from)?;

		Self::with_base_url(base_url, executor)
	}

	/// Creates a client for `base_url`, which must be HTTPS unless it points at loopback.
	pub fn with_base_url(base_url: Url, executor: Arc<RetryingExecutor>) -> Result<Self> {
		ensure_secure("base_url", &base_url)?;

		let http = ReqwestClient::builder().build().map_err(ConfigError::from)?;

		Ok(Self { http, base_url, executor, cache: None })
	}

	/// Sends requests through `client`.
	pub fn with_http_client(mut self, client: ReqwestClient) -> Self {
		self.http = client;

		self
	}

	/// Serves reads from `cache` and invalidates it on writes.
	pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
		self.cache = Some(cache);

		self
	}

	/// Response cache, if enabled.
	pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
		self.cache.as_ref()
	}

	/// Executor running every request.
	pub fn executor(&self) -> &Arc<RetryingExecutor> {
		&self.executor
	}

	/// Cache-eligible read: served from `key` when live, fetched and cached otherwise.
	pub async fn read(
		&self,
		operation: &str,
		key: &CacheKey,
		request: ApiRequest,
	) -> Result<serde_json::Value> {
		let Some(cache) = &self.cache else {
			return self.send(operation, &request).await;
		};

		if let Some(value) = cache.retrieve(key) {
			return Ok(value);
		}

		let ticket = cache.ticket();
		let value = self.send(operation, &request).await?;

		cache.store_if_current(ticket, key, value.clone(), cache.default_ttl());

		Ok(value)
	}

	/// Read that bypasses the cache in both directions.
	pub async fn read_uncached(
		&self,
		operation: &str,
		request: ApiRequest,
	) -> Result<serde_json::Value> {
		self.send(operation, &request).await
	}

	/// Mutating call; invalidates whatever `scope` may have touched once the call settles.
	pub async fn write(
		&self,
		operation: &str,
		scope: &WriteScope,
		request: ApiRequest,
	) -> Result<serde_json::Value> {
		let result = self.send(operation, &request).await;

		if let Some(cache) = &self.cache {
			cache.invalidate(scope);
		}

		result
	}

	async fn send(&self, operation: &str, request: &ApiRequest) -> Result<serde_json::Value> {
		self.executor.execute(operation, move |token| self.dispatch(token, request)).await
	}

	async fn dispatch(&self, token: TokenSecret, request: &ApiRequest) -> Result<serde_json::Value> {
		let url = self
			.base_url
			.join(&request.path)
			.map_err(|source| EndpointConfigError::InvalidUrl { field: "path", source })
			.map_err(ConfigError::from)?;
		let mut builder = self
			.http
			.request(request.method.clone(), url)
			.header(AUTHORIZATION, token.bearer_header())
			.query(&request.query);

		if let Some(body) = &request.body {
			builder = builder.json(body);
		}

		let response = builder.send().await.map_err(TransportError::from)?;
		let status = response.status();
		let retry_after = http::parse_retry_after(response.headers());
		let body = response.bytes().await.map_err(TransportError::from)?;

		if status.is_success() {
			if body.is_empty() {
				return Ok(serde_json::Value::Null);
			}

			return serde_json::from_slice(&body).map_err(|e| {
				TransientError::MalformedBody { status: status.as_u16(), source: Arc::new(e) }.into()
			});
		}

		Err(Error::from_status(
			status.as_u16(),
			retry_after,
			error_message(&body, status.canonical_reason()),
		))
	}
}

#[derive(Deserialize)]
struct ErrorEnvelope {
	error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	status: Option<String>,
}

fn error_message(body: &[u8], canonical: Option<&str>) -> String {
	if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
		let ErrorDetail { message, status } = envelope.error;

		match (status, message) {
			(Some(status), Some(message)) => return format!("{status}: {message}"),
			(None, Some(message)) => return message,
			(Some(status), None) => return status,
			(None, None) => (),
		}
	}

	let text = String::from_utf8_lossy(body);
	let text = text.trim();

	if text.is_empty() {
		return canonical.unwrap_or("no response body").to_owned();
	}

	text.chars().take(MESSAGE_PREVIEW_LIMIT).collect()
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;
	use crate::{
		auth::Credential,
		provider::{ProviderFuture, StaticTokenProvider, TokenProvider},
		retry::RetryConfig,
	};

	const SHEET: &str = "sheet-1";

	/// Hands out `token-N`, bumping `N` on every refresh.
	#[derive(Default)]
	struct RotatingProvider {
		generation: AtomicU32,
		refreshes: AtomicU32,
	}
	impl TokenProvider for RotatingProvider {
		fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
			Box::pin(async move {
				Ok(TokenSecret::new(format!("token-{}", self.generation.load(Ordering::SeqCst))))
			})
		}

		fn refresh(&self) -> ProviderFuture<'_, Credential> {
			Box::pin(async move {
				self.refreshes.fetch_add(1, Ordering::SeqCst);

				let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

				Ok(Credential::builder()
					.access_token(format!("token-{generation}"))
					.expires_in(Duration::from_secs(3600))
					.build()
					.expect("Credential fixture should build."))
			})
		}

		fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
			Box::pin(async { Ok(true) })
		}

		fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
			Box::pin(async { Ok(()) })
		}
	}

	fn fast_retries(max_retries: u32) -> RetryConfig {
		RetryConfig {
			max_retries,
			base_delay: Duration::from_millis(5),
			max_delay: Duration::from_millis(20),
			..Default::default()
		}
	}

	fn client(server: &MockServer, provider: Arc<dyn TokenProvider>, retries: RetryConfig) -> ApiClient {
		let executor =
			RetryingExecutor::new(provider, retries).expect("Executor should build.");
		let base = Url::parse(&server.url("/v4/")).expect("Mock base URL should parse.");

		ApiClient::with_base_url(base, Arc::new(executor))
			.expect("Loopback base URL should be accepted.")
			.with_http_client(crate::_preludet::test_reqwest_client())
			.with_cache(Arc::new(ResponseCache::new(Duration::from_secs(60))))
	}

	fn static_provider() -> Arc<dyn TokenProvider> {
		Arc::new(
			StaticTokenProvider::bearer("static-token", Duration::from_secs(3600))
				.expect("Static provider should build."),
		)
	}

	fn values_key(range: &str) -> CacheKey {
		CacheKey::builder("values.get").resource(SHEET).range(range).build()
	}

	#[tokio::test]
	async fn reads_are_cached_until_a_write_touches_them() {
		let server = MockServer::start_async().await;
		let read = server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/v4/spreadsheets/sheet-1/values/A1:B2")
					.header("authorization", "Bearer static-token");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"range":"A1:B2","values":[["1","2"]]}"#);
			})
			.await;
		let write = server
			.mock_async(|when, then| {
				when.method(PUT).path("/v4/spreadsheets/sheet-1/values/A1:B2");
				then.status(200).header("content-type", "application/json").body(r#"{"updatedCells":2}"#);
			})
			.await;
		let client = client(&server, static_provider(), fast_retries(0));
		let key = values_key("A1:B2");
		let request = ApiRequest::get("spreadsheets/sheet-1/values/A1:B2");
		let first = client.read("values.get", &key, request.clone()).await.expect("Read should succeed.");
		let second = client.read("values.get", &key, request.clone()).await.expect("Read should succeed.");

		assert_eq!(first, second);
		assert_eq!(first["values"][0][1], "2");

		read.assert_calls_async(1).await;

		client
			.write(
				"values.update",
				&WriteScope::resource(SHEET).range("A1:B2"),
				ApiRequest::put("spreadsheets/sheet-1/values/A1:B2")
					.query("valueInputOption", "RAW")
					.json(serde_json::json!({ "values": [["3", "4"]] })),
			)
			.await
			.expect("Write should succeed.");
		write.assert_calls_async(1).await;

		assert!(client.cache().is_some_and(|cache| cache.is_empty()));

		client.read("values.get", &key, request).await.expect("Read should succeed.");
		read.assert_calls_async(2).await;
	}

	#[tokio::test]
	async fn failed_writes_still_invalidate() {
		let server = MockServer::start_async().await;
		let read = server
			.mock_async(|when, then| {
				when.method(GET).path("/v4/spreadsheets/sheet-1/values/A1");
				then.status(200).header("content-type", "application/json").body(r#"{"values":[]}"#);
			})
			.await;
		let write = server
			.mock_async(|when, then| {
				when.method(POST).path("/v4/spreadsheets/sheet-1:batchUpdate");
				then.status(400).header("content-type", "application/json").body(
					r#"{"error":{"code":400,"message":"Invalid requests[0]","status":"INVALID_ARGUMENT"}}"#,
				);
			})
			.await;
		let client = client(&server, static_provider(), fast_retries(2));
		let key = values_key("A1");

		client
			.read("values.get", &key, ApiRequest::get("spreadsheets/sheet-1/values/A1"))
			.await
			.expect("Read should succeed.");

		let err = client
			.write(
				"batch_update",
				&WriteScope::resource(SHEET),
				ApiRequest::post("spreadsheets/sheet-1:batchUpdate").json(serde_json::json!({ "requests": [] })),
			)
			.await
			.expect_err("Bad request should fail.");

		assert!(
			matches!(&err, Error::BadRequest { status: 400, reason } if reason.starts_with("INVALID_ARGUMENT")),
			"Unexpected error: {err:?}."
		);

		write.assert_calls_async(1).await;
		read.assert_calls_async(1).await;

		assert!(!client.cache().is_some_and(|cache| cache.contains(&key)));
	}

	#[tokio::test]
	async fn unauthorized_refreshes_once_then_retries() {
		let server = MockServer::start_async().await;
		let rejected = server
			.mock_async(|when, then| {
				when.method(GET).path("/v4/spreadsheets/sheet-1").header("authorization", "Bearer token-0");
				then.status(401).body("Request had invalid authentication credentials.");
			})
			.await;
		let accepted = server
			.mock_async(|when, then| {
				when.method(GET).path("/v4/spreadsheets/sheet-1").header("authorization", "Bearer token-1");
				then.status(200).header("content-type", "application/json").body(r#"{"spreadsheetId":"sheet-1"}"#);
			})
			.await;
		let provider = Arc::new(RotatingProvider::default());
		let client = client(&server, provider.clone(), fast_retries(0));
		let value = client
			.read_uncached("spreadsheets.get", ApiRequest::get("spreadsheets/sheet-1"))
			.await
			.expect("Retry with a refreshed token should succeed.");

		assert_eq!(value["spreadsheetId"], "sheet-1");
		assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

		rejected.assert_calls_async(1).await;
		accepted.assert_calls_async(1).await;
	}

	#[tokio::test]
	async fn rate_limits_are_retried_then_exhausted() {
		let server = MockServer::start_async().await;
		let limited = server
			.mock_async(|when, then| {
				when.method(GET).path("/v4/spreadsheets/sheet-1");
				then.status(429).header("retry-after", "0").body("Quota exceeded.");
			})
			.await;
		let client = client(&server, static_provider(), fast_retries(2));
		let err = client
			.read_uncached("spreadsheets.get", ApiRequest::get("spreadsheets/sheet-1"))
			.await
			.expect_err("Persistent throttling should fail.");

		match err {
			Error::RetriesExhausted { attempts, last, .. } => {
				assert_eq!(attempts, 3);
				assert!(matches!(*last, Error::RateLimited { retry_after: Some(d) } if d.is_zero()));
			},
			other => panic!("Unexpected error: {other:?}."),
		}

		limited.assert_calls_async(3).await;
	}

	#[tokio::test]
	async fn empty_success_bodies_decode_as_null() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(POST).path("/v4/spreadsheets/sheet-1/values/A1:clear");
				then.status(200);
			})
			.await;

		let client = client(&server, static_provider(), fast_retries(0));
		let value = client
			.write(
				"values.clear",
				&WriteScope::resource(SHEET).range("A1"),
				ApiRequest::post("spreadsheets/sheet-1/values/A1:clear"),
			)
			.await
			.expect("Clear should succeed.");

		assert_eq!(value, serde_json::Value::Null);
	}

	#[test]
	fn error_messages_prefer_the_structured_body() {
		let body = br#"{"error":{"code":403,"message":"The caller does not have permission","status":"PERMISSION_DENIED"}}"#;

		assert_eq!(
			error_message(body, Some("Forbidden")),
			"PERMISSION_DENIED: The caller does not have permission"
		);
		assert_eq!(error_message(b"", Some("Not Found")), "Not Found");
		assert_eq!(error_message(b"upstream exploded", None), "upstream exploded");
		assert_eq!(error_message(&[b'x'; 1024], None).len(), MESSAGE_PREVIEW_LIMIT);
	}
}
