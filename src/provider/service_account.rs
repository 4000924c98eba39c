//! Service-identity credentials minted from signed assertions (RFC 7523 JWT bearer grant).
//!
//! There is no refresh token: every issuance signs a fresh assertion and exchanges it.
//! Concurrent callers that find no usable credential share one exchange per identity, and the
//! identity is fixed when the exchange starts, so [`set_subject`] never redirects a flight that
//! is already running.
//!
//! [`set_subject`]: ServiceAccountTokenProvider::set_subject

// std
use std::path::Path;
// self
use crate::{
	_prelude::*,
	assertion::{ServiceAccountKey, SignedAssertionIssuer},
	auth::{AccountId, Credential, IdentifierError, Namespace, ScopeSet, TokenSecret},
	error::ConfigError,
	flight::{SingleFlight, WriteEpoch},
	http::TokenHttpClient,
	oauth::{TokenExchange, TransportErrorMapper},
	obs::{self, ExchangeMetrics, FlowKind},
	provider::{ProviderFuture, TokenProvider},
	store::{CredentialStore, MemoryStore, StoreKey},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Namespace used for service-account credentials unless overridden.
pub const DEFAULT_NAMESPACE: &str = "service-account";

/// Token provider for a service identity, optionally impersonating a user.
pub struct ServiceAccountTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	issuer: Arc<SignedAssertionIssuer>,
	exchange: TokenExchange<C, M>,
	store: Option<Arc<dyn CredentialStore>>,
	namespace: Namespace,
	subject: RwLock<Option<String>>,
	flights: SingleFlight<StoreKey, Credential>,
	issued: Mutex<HashSet<StoreKey>>,
	epoch: WriteEpoch,
	metrics: Arc<ExchangeMetrics>,
}
#[cfg(feature = "reqwest")]
impl ServiceAccountTokenProvider<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a provider for `key` backed by a fresh reqwest transport.
	pub fn from_key(key: &ServiceAccountKey, scope: ScopeSet) -> Result<Self> {
		Self::with_http_client(key, scope, ReqwestHttpClient::new()?, ReqwestTransportErrorMapper)
	}

	/// Loads the key from a JSON credential file.
	pub fn from_key_file(path: impl AsRef<Path>, scope: ScopeSet) -> Result<Self> {
		Self::from_key(&ServiceAccountKey::from_file(path)?, scope)
	}

	/// Loads the key from the file named by
	/// [`CREDENTIALS_ENV`](crate::assertion::CREDENTIALS_ENV).
	pub fn from_env(scope: ScopeSet) -> Result<Self> {
		Self::from_key(&ServiceAccountKey::from_env()?, scope)
	}
}
impl<C, M> ServiceAccountTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates a provider that reuses the caller-provided transport + mapper pair.
	///
	/// Issued credentials are kept in a private [`MemoryStore`] until
	/// [`with_store`](Self::with_store) or [`without_persistence`](Self::without_persistence)
	/// says otherwise.
	pub fn with_http_client(
		key: &ServiceAccountKey,
		scope: ScopeSet,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let issuer = SignedAssertionIssuer::new(key, scope)?;

		crate::provider::config::ensure_secure("token_uri", issuer.token_uri())?;

		Ok(Self {
			issuer: Arc::new(issuer),
			exchange: TokenExchange::new(http_client.into(), mapper.into()),
			store: Some(Arc::new(MemoryStore::default())),
			namespace: Namespace::new(DEFAULT_NAMESPACE).map_err(ConfigError::from)?,
			subject: RwLock::new(None),
			flights: SingleFlight::new(),
			issued: Mutex::new(HashSet::new()),
			epoch: WriteEpoch::default(),
			metrics: Default::default(),
		})
	}

	/// Persists issued credentials in `store`.
	pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Keeps nothing between requests; every request that does not join an in-flight exchange
	/// issues a new credential.
	pub fn without_persistence(mut self) -> Self {
		self.store = None;

		self
	}

	/// Stores credentials under `namespace`.
	pub fn with_namespace(mut self, namespace: Namespace) -> Self {
		self.namespace = namespace;

		self
	}

	/// Starts out impersonating `subject`.
	pub fn with_subject(self, subject: impl Into<String>) -> Result<Self> {
		self.set_subject(Some(subject.into()))?;

		Ok(self)
	}

	/// Sets or clears the impersonated user.
	///
	/// Takes effect for the next token request; an exchange already in flight completes for
	/// the identity it started with. A subject that cannot key the store is rejected and the
	/// current one stays in place.
	pub fn set_subject(&self, subject: Option<String>) -> Result<()> {
		if let Some(subject) = &subject {
			self.account_for(subject).map_err(|source| ConfigError::InvalidSubject {
				subject: subject.clone(),
				source,
			})?;
		}

		*self.subject.write() = subject;

		Ok(())
	}

	/// Currently impersonated user, if any.
	pub fn subject(&self) -> Option<String> {
		self.subject.read().clone()
	}

	/// Assertion issuer backing this provider.
	pub fn issuer(&self) -> &SignedAssertionIssuer {
		&self.issuer
	}

	/// Exchange counters for this provider.
	pub fn exchange_metrics(&self) -> &ExchangeMetrics {
		&self.metrics
	}

	/// Returns `true` if credentials are kept between requests.
	pub fn is_persistent(&self) -> bool {
		self.store.is_some()
	}

	/// Store key for the identity that `subject` selects.
	///
	/// Keys combine the effective identity (subject or service email) with the scope
	/// fingerprint, so switching identity or scopes never serves another key's token.
	pub fn store_key(&self, subject: Option<&str>) -> Result<StoreKey> {
		let identity = subject.unwrap_or_else(|| self.issuer.service_email());
		let account = self.account_for(identity).map_err(ConfigError::from)?;

		Ok(StoreKey::new(self.namespace.clone(), account))
	}

	fn account_for(&self, identity: &str) -> Result<AccountId, IdentifierError> {
		AccountId::new(format!("{identity}#{}", self.issuer.scope().fingerprint()))
	}

	async fn current_access_token(&self) -> Result<TokenSecret> {
		let subject = self.subject();
		let key = self.store_key(subject.as_deref())?;

		if let Some(credential) = fetch_usable(self.store.as_deref(), &key).await? {
			return Ok(credential.access_token);
		}

		Ok(self.issue(key, subject, false).await?.access_token)
	}

	async fn issue(&self, key: StoreKey, subject: Option<String>, force: bool) -> Result<Credential> {
		let issuer = Arc::clone(&self.issuer);
		let exchange = self.exchange.clone();
		let store = self.store.clone();
		let metrics = Arc::clone(&self.metrics);
		let epoch = self.epoch.clone();
		let tracked = key.clone();
		let credential = self
			.flights
			.run(key.clone(), move || async move {
				let observed = epoch.current().await;
				// A flight that finished between the caller's store read and this one may
				// already have saved a usable credential.
				let cached = if force { None } else { fetch_usable(store.as_deref(), &key).await? };

				if let Some(credential) = cached {
					return Ok(credential);
				}

				metrics.record_attempt();

				let result = obs::observe_flow(FlowKind::SignedAssertion, "jwt_bearer", async {
					let assertion = issuer.issue(subject.as_deref())?;

					exchange.jwt_bearer(issuer.token_uri(), assertion.into_encoded()).await
				})
				.await;

				metrics.record_outcome(&result);

				let credential = result?;

				// Credentials minted across a clear reach their callers but are not kept.
				if let Some(store) = &store {
					if let Some(saved) =
						epoch.if_current(observed, || store.save(&key, credential.clone())).await
					{
						saved?;
					}
				}

				Ok(credential)
			})
			.await?;

		if self.store.is_some() {
			self.issued.lock().insert(tracked);
		}

		Ok(credential)
	}

	async fn force_refresh(&self) -> Result<Credential> {
		let subject = self.subject();
		let key = self.store_key(subject.as_deref())?;

		self.issue(key, subject, true).await
	}

	async fn authenticated(&self) -> Result<bool> {
		let Some(store) = &self.store else {
			return Ok(false);
		};
		let key = self.store_key(self.subject().as_deref())?;

		Ok(!store.is_expired(&key).await?)
	}

	async fn clear(&self) -> Result<()> {
		let Some(store) = &self.store else {
			return Ok(());
		};
		let mut keys = self.issued.lock().drain().collect::<HashSet<_>>();

		keys.insert(self.store_key(self.subject().as_deref())?);

		self.epoch
			.advance(|| async {
				for key in &keys {
					store.delete(key).await?;
				}

				Ok::<_, Error>(())
			})
			.await
	}
}
impl<C, M> TokenProvider for ServiceAccountTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
		Box::pin(self.current_access_token())
	}

	fn refresh(&self) -> ProviderFuture<'_, Credential> {
		Box::pin(self.force_refresh())
	}

	fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
		Box::pin(self.authenticated())
	}

	fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
		Box::pin(self.clear())
	}
}
impl<C, M> Debug for ServiceAccountTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceAccountTokenProvider")
			.field("issuer", &self.issuer)
			.field("namespace", &self.namespace)
			.field("subject", &*self.subject.read())
			.field("persistent", &self.store.is_some())
			.field("flights", &self.flights)
			.finish_non_exhaustive()
	}
}

async fn fetch_usable(
	store: Option<&dyn CredentialStore>,
	key: &StoreKey,
) -> Result<Option<Credential>> {
	let Some(store) = store else {
		return Ok(None);
	};

	Ok(store.fetch(key).await?.filter(|credential| !credential.is_expired()))
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	use oauth2::{
		AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
		http::{Response, header::CONTENT_TYPE},
	};
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::scope,
		error::TransportError,
		http::{ResponseMetadata, ResponseMetadataSlot},
		oauth::TokenGrant,
	};

	const ALICE: &str = "alice@example.com";

	/// Scripted token endpoint that records the impersonated subject of every assertion.
	#[derive(Default)]
	struct FakeEndpoint {
		calls: AtomicU32,
		subjects: Mutex<Vec<Option<String>>>,
		latency: Duration,
		reject: bool,
	}
	impl FakeEndpoint {
		fn slow(latency: Duration) -> Arc<Self> {
			Arc::new(Self { latency, ..Default::default() })
		}

		fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}

		fn respond(&self, request: &HttpRequest) -> HttpResponse {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			self.subjects.lock().push(subject_of(request.body()));

			let (status, body) = if self.reject {
				(400, r#"{"error":"invalid_grant","error_description":"Invalid JWT Signature."}"#.to_owned())
			} else {
				(
					200,
					format!(r#"{{"access_token":"token-{n}","expires_in":3600,"token_type":"Bearer"}}"#),
				)
			};

			Response::builder()
				.status(status)
				.header(CONTENT_TYPE, "application/json")
				.body(body.into_bytes())
				.expect("Fake response should build.")
		}
	}

	#[derive(Clone)]
	struct FakeHttpClient(Arc<FakeEndpoint>);
	impl TokenHttpClient for FakeHttpClient {
		type Handle = FakeHandle;
		type TransportError = std::io::Error;

		fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
			FakeHandle { endpoint: Arc::clone(&self.0), slot }
		}
	}

	struct FakeHandle {
		endpoint: Arc<FakeEndpoint>,
		slot: ResponseMetadataSlot,
	}
	impl<'c> AsyncHttpClient<'c> for FakeHandle {
		type Error = HttpClientError<std::io::Error>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			Box::pin(async move {
				self.slot.take();

				let response = self.endpoint.respond(&request);

				tokio::time::sleep(self.endpoint.latency).await;
				self.slot.store(ResponseMetadata {
					status: Some(response.status().as_u16()),
					retry_after: None,
				});

				Ok(response)
			})
		}
	}

	struct FakeMapper;
	impl TransportErrorMapper<std::io::Error> for FakeMapper {
		fn map_transport_error(
			&self,
			_: TokenGrant,
			_: Option<&ResponseMetadata>,
			error: HttpClientError<std::io::Error>,
		) -> Error {
			TransportError::network(std::io::Error::other(error.to_string())).into()
		}
	}

	type FakeProvider = ServiceAccountTokenProvider<FakeHttpClient, FakeMapper>;

	fn subject_of(body: &[u8]) -> Option<String> {
		let assertion = url::form_urlencoded::parse(body)
			.find(|(name, _)| name == "assertion")
			.map(|(_, value)| value.into_owned())
			.expect("Request should carry an assertion.");
		let payload = assertion.split('.').nth(1).expect("Assertion should have a payload.");
		let claims: serde_json::Value = serde_json::from_slice(
			&URL_SAFE_NO_PAD.decode(payload).expect("Payload should be base64url."),
		)
		.expect("Payload should be JSON.");

		claims.get("sub").and_then(|sub| sub.as_str()).map(ToOwned::to_owned)
	}

	fn provider(endpoint: &Arc<FakeEndpoint>) -> FakeProvider {
		let key = test_service_account_key("https://oauth2.googleapis.com/token");
		let scope = ScopeSet::new([scope::SPREADSHEETS]).expect("Scope should build.");

		ServiceAccountTokenProvider::with_http_client(
			&key,
			scope,
			FakeHttpClient(Arc::clone(endpoint)),
			FakeMapper,
		)
		.expect("Provider should build.")
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_requests_share_one_exchange() {
		let endpoint = FakeEndpoint::slow(Duration::from_millis(200));
		let provider = provider(&endpoint);
		let (a, b, c) =
			tokio::join!(provider.access_token(), provider.access_token(), provider.access_token());

		for token in [a, b, c] {
			assert_eq!(token.expect("Every waiter should get the token.").expose(), "token-1");
		}

		assert_eq!(endpoint.calls(), 1);
		assert_eq!(provider.exchange_metrics().attempts(), 1);
		assert_eq!(provider.exchange_metrics().successes(), 1);

		let again = provider.access_token().await.expect("Cached token should be served.");

		assert_eq!(again.expose(), "token-1");
		assert_eq!(endpoint.calls(), 1);
		assert!(provider.is_authenticated().await.expect("Expiry check should succeed."));
	}

	#[tokio::test(start_paused = true)]
	async fn shared_failure_reaches_every_waiter_then_clears() {
		let endpoint = Arc::new(FakeEndpoint {
			latency: Duration::from_millis(50),
			reject: true,
			..Default::default()
		});
		let provider = provider(&endpoint);
		let (a, b) = tokio::join!(provider.access_token(), provider.access_token());

		assert!(matches!(a, Err(Error::InvalidGrant { .. })));
		assert!(matches!(b, Err(Error::InvalidGrant { .. })));
		assert_eq!(endpoint.calls(), 1);
		assert_eq!(provider.exchange_metrics().failures(), 1);

		let retry = provider.access_token().await;

		assert!(retry.is_err());
		assert_eq!(endpoint.calls(), 2, "A finished flight must not cache its failure.");
	}

	#[tokio::test(start_paused = true)]
	async fn subject_switch_does_not_redirect_a_running_exchange() {
		let endpoint = FakeEndpoint::slow(Duration::from_secs(1));
		let provider = Arc::new(provider(&endpoint));
		let service = tokio::spawn({
			let provider = Arc::clone(&provider);

			async move { provider.access_token().await }
		});

		while endpoint.calls() == 0 {
			tokio::task::yield_now().await;
		}

		provider.set_subject(Some(ALICE.to_owned())).expect("Subject should be accepted.");

		let impersonated = provider.access_token().await.expect("Impersonated token should issue.");
		let service = service
			.await
			.expect("Service task should not panic.")
			.expect("Service token should issue.");

		assert_eq!(service.expose(), "token-1");
		assert_eq!(impersonated.expose(), "token-2");
		assert_eq!(*endpoint.subjects.lock(), vec![None, Some(ALICE.to_owned())]);

		let service_key = provider.store_key(None).expect("Key should build.");
		let alice_key = provider.store_key(Some(ALICE)).expect("Key should build.");

		assert_ne!(service_key, alice_key);
		assert!(service_key.account.starts_with(TEST_SERVICE_EMAIL));

		provider.clear_tokens().await.expect("Clearing should succeed.");
		provider.set_subject(None).expect("Clearing the subject should succeed.");

		assert!(!provider.is_authenticated().await.expect("Expiry check should succeed."));

		let reissued = provider.access_token().await.expect("Token should re-issue after clear.");

		assert_eq!(reissued.expose(), "token-3");
	}

	#[tokio::test(start_paused = true)]
	async fn without_persistence_every_request_issues() {
		let endpoint = FakeEndpoint::slow(Duration::ZERO);
		let provider = provider(&endpoint).without_persistence();

		assert!(!provider.is_persistent());

		let first = provider.access_token().await.expect("First token should issue.");
		let second = provider.access_token().await.expect("Second token should issue.");

		assert_eq!(first.expose(), "token-1");
		assert_eq!(second.expose(), "token-2");
		assert!(!provider.is_authenticated().await.expect("Check should succeed."));
		provider.clear_tokens().await.expect("Clearing nothing should succeed.");
	}

	#[tokio::test(start_paused = true)]
	async fn forced_refresh_replaces_the_stored_credential() {
		let endpoint = FakeEndpoint::slow(Duration::ZERO);
		let store = Arc::new(MemoryStore::default());
		let provider = provider(&endpoint)
			.with_store(store.clone())
			.with_subject(ALICE)
			.expect("Subject should be accepted.");

		provider.access_token().await.expect("Token should issue.");

		let refreshed = provider.refresh().await.expect("Forced refresh should succeed.");
		let key = provider.store_key(Some(ALICE)).expect("Key should build.");

		assert_eq!(refreshed.access_token.expose(), "token-2");
		assert_eq!(
			store.get(&key).map(|credential| credential.access_token.expose().to_owned()),
			Some("token-2".to_owned())
		);
		assert_eq!(endpoint.calls(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn exchange_finishing_after_clear_is_not_persisted() {
		let endpoint = FakeEndpoint::slow(Duration::from_secs(1));
		let store = Arc::new(MemoryStore::default());
		let provider = Arc::new(provider(&endpoint).with_store(store.clone()));
		let pending = tokio::spawn({
			let provider = Arc::clone(&provider);

			async move { provider.access_token().await }
		});

		while endpoint.calls() == 0 {
			tokio::task::yield_now().await;
		}

		provider.clear_tokens().await.expect("Clearing should succeed.");

		let token = pending
			.await
			.expect("Pending task should not panic.")
			.expect("The in-flight caller should still get its token.");

		assert_eq!(token.expose(), "token-1");
		assert!(store.is_empty(), "Cleared credentials must not be resurrected.");
		assert!(!provider.is_authenticated().await.expect("Expiry check should succeed."));

		let reissued = provider.access_token().await.expect("Token should re-issue after clear.");

		assert_eq!(reissued.expose(), "token-2");
		assert_eq!(store.len(), 1);
	}

	#[test]
	fn unusable_subject_is_rejected_by_name() {
		let endpoint = FakeEndpoint::slow(Duration::ZERO);
		let provider = provider(&endpoint);
		let err = provider
			.set_subject(Some("alice smith@example.com".to_owned()))
			.expect_err("Whitespace cannot key the store.");

		assert!(
			matches!(
				&err,
				Error::Config(ConfigError::InvalidSubject { subject, .. })
					if subject == "alice smith@example.com"
			),
			"Unexpected error: {err:?}."
		);
		assert!(err.to_string().contains("alice smith@example.com"));
		assert_eq!(provider.subject(), None);

		let oversized = format!("{}@example.com", "a".repeat(400));

		assert!(provider.with_subject(oversized).is_err());
	}
}
