//! Delegated credentials: user consent through authorization code + PKCE, renewal through
//! refresh tokens.
//!
//! The provider keeps exactly one credential per [`StoreKey`]. Reads that find a credential
//! outside the expiry buffer never touch the network; once it expires, concurrent callers
//! share one refresh exchange and all observe its outcome. A refresh that loses a race with
//! [`clear_tokens`](TokenProvider::clear_tokens) or a new consent is never persisted.

pub mod session;

pub use session::AuthorizationSession;

// self
use crate::{
	_prelude::*,
	auth::{AccountId, Credential, TokenSecret},
	flight::{SingleFlight, WriteEpoch},
	http::TokenHttpClient,
	oauth::{self, ConfiguredBasicClient, TokenExchange, TransportErrorMapper},
	obs::{self, ExchangeMetrics, FlowKind},
	provider::{OAuthClientConfig, ProviderFuture, TokenProvider},
	store::{CredentialStore, StoreKey},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Token provider for a user who granted access through the consent flow.
pub struct DelegatedTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	config: OAuthClientConfig,
	client: Arc<ConfiguredBasicClient>,
	store: Arc<dyn CredentialStore>,
	key: StoreKey,
	exchange: TokenExchange<C, M>,
	flights: SingleFlight<StoreKey, Credential>,
	epoch: WriteEpoch,
	metrics: Arc<ExchangeMetrics>,
}
#[cfg(feature = "reqwest")]
impl DelegatedTokenProvider<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a provider backed by a fresh reqwest transport.
	pub fn new(config: OAuthClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
		Ok(Self::with_http_client(
			config,
			store,
			ReqwestHttpClient::new()?,
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> DelegatedTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates a provider that reuses the caller-provided transport + mapper pair.
	///
	/// Credentials live under `config.namespace()` and the [`AccountId::DEFAULT`] account until
	/// [`with_account`](Self::with_account) says otherwise.
	pub fn with_http_client(
		config: OAuthClientConfig,
		store: Arc<dyn CredentialStore>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		let key = StoreKey::new(config.namespace().clone(), AccountId::default_user());

		Self {
			client: Arc::new(oauth::basic_client(&config)),
			config,
			store,
			key,
			exchange: TokenExchange::new(http_client.into(), mapper.into()),
			flights: SingleFlight::new(),
			epoch: WriteEpoch::default(),
			metrics: Default::default(),
		}
	}

	/// Stores credentials under `account` instead of the default account.
	pub fn with_account(mut self, account: AccountId) -> Self {
		self.key = StoreKey::new(self.config.namespace().clone(), account);

		self
	}

	/// Client configuration.
	pub fn config(&self) -> &OAuthClientConfig {
		&self.config
	}

	/// Key the credential is persisted under.
	pub fn store_key(&self) -> &StoreKey {
		&self.key
	}

	/// Exchange counters for this provider.
	pub fn exchange_metrics(&self) -> &ExchangeMetrics {
		&self.metrics
	}

	/// Starts a consent handshake; send the user to the returned session's `authorize_url`.
	pub fn start_authorization(&self) -> AuthorizationSession {
		AuthorizationSession::start(&self.config)
	}

	/// Completes the handshake: validates `returned_state`, redeems `code` with the PKCE
	/// verifier, and persists the resulting credential.
	pub async fn exchange_code(
		&self,
		session: &AuthorizationSession,
		code: &str,
		returned_state: &str,
	) -> Result<Credential> {
		session.validate_state(returned_state)?;

		self.metrics.record_attempt();

		let result = obs::observe_flow(
			FlowKind::AuthorizationCode,
			"exchange_code",
			self.exchange.authorization_code(&self.client, code, session.pkce_verifier()),
		)
		.await;

		self.metrics.record_outcome(&result);

		let credential = result?;

		self.epoch.advance(|| self.store.save(&self.key, credential.clone())).await?;

		Ok(credential)
	}

	/// Currently stored credential, expired or not.
	pub async fn credential(&self) -> Result<Option<Credential>> {
		Ok(self.store.fetch(&self.key).await?)
	}

	async fn current_access_token(&self) -> Result<TokenSecret> {
		match self.store.fetch(&self.key).await? {
			Some(credential) if !credential.is_expired() => Ok(credential.access_token),
			Some(credential) if credential.can_refresh() =>
				Ok(self.refresh_credential().await?.access_token),
			_ => Err(Error::Unauthenticated {
				reason: "no usable delegated credential; complete the authorization flow".into(),
			}),
		}
	}

	async fn refresh_credential(&self) -> Result<Credential> {
		let key = self.key.clone();
		let store = Arc::clone(&self.store);
		let client = Arc::clone(&self.client);
		let exchange = self.exchange.clone();
		let metrics = Arc::clone(&self.metrics);
		let epoch = self.epoch.clone();

		self.flights
			.run(self.key.clone(), move || async move {
				let observed = epoch.current().await;
				let refresh_token = store
					.fetch(&key)
					.await?
					.and_then(|credential| credential.refresh_token)
					.ok_or_else(|| Error::Unauthenticated {
						reason: "stored credential carries no refresh token".into(),
					})?;

				metrics.record_attempt();

				let result = obs::observe_flow(
					FlowKind::Refresh,
					"refresh",
					exchange.refresh(&client, &refresh_token),
				)
				.await;

				metrics.record_outcome(&result);

				match result {
					Ok(credential) => {
						let credential = credential.with_refresh_fallback(Some(refresh_token));

						match epoch.if_current(observed, || store.save(&key, credential.clone())).await {
							Some(saved) => saved?,
							None => return Err(superseded()),
						}

						Ok(credential)
					},
					Err(e @ Error::InvalidGrant { .. }) => {
						// The revoked grant stays the caller's error; a failed delete is reported
						// out of band.
						if let Some(Err(store_error)) =
							epoch.if_current(observed, || store.delete(&key)).await
						{
							metrics.record_store_failure();
							obs::record_store_failure("delete_revoked", &key, &store_error);
						}

						Err(e)
					},
					Err(e) => Err(e),
				}
			})
			.await
	}
}
impl<C, M> TokenProvider for DelegatedTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
		Box::pin(self.current_access_token())
	}

	fn refresh(&self) -> ProviderFuture<'_, Credential> {
		Box::pin(self.refresh_credential())
	}

	fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
		Box::pin(async move { Ok(!self.store.is_expired(&self.key).await?) })
	}

	fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
		Box::pin(async move {
			self.epoch.advance(|| self.store.delete(&self.key)).await?;

			Ok(())
		})
	}
}
impl<C, M> Debug for DelegatedTokenProvider<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DelegatedTokenProvider")
			.field("config", &self.config)
			.field("key", &self.key)
			.field("flights", &self.flights)
			.finish_non_exhaustive()
	}
}

fn superseded() -> Error {
	Error::Unauthenticated {
		reason: "credential was cleared or replaced while the refresh was in flight".into(),
	}
}
