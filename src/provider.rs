//! Token providers: where the executor gets the bearer token for each attempt.
//!
//! [`DelegatedTokenProvider`] serves user-delegated credentials obtained through the
//! authorization-code grant and renewed with refresh tokens. [`ServiceAccountTokenProvider`]
//! mints credentials for a service identity from signed assertions. Both coalesce concurrent
//! issuance into one exchange per identity. [`StaticTokenProvider`] serves a token obtained
//! elsewhere.

pub mod config;
pub mod delegated;
pub mod service_account;

mod static_token;

pub use config::{OAuthClientConfig, OAuthClientConfigBuilder};
pub use delegated::{AuthorizationSession, DelegatedTokenProvider};
pub use service_account::ServiceAccountTokenProvider;
pub use static_token::StaticTokenProvider;

// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
};

/// Boxed future returned by [`TokenProvider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Source of access tokens shared by every caller of one executor.
pub trait TokenProvider
where
	Self: Send + Sync,
{
	/// Returns a usable access token, issuing or refreshing one if needed.
	///
	/// Never performs network I/O while a non-expired credential is available.
	fn access_token(&self) -> ProviderFuture<'_, TokenSecret>;

	/// Obtains a new credential regardless of the current one's expiry.
	fn refresh(&self) -> ProviderFuture<'_, Credential>;

	/// Returns `true` if a non-expired credential is currently held.
	fn is_authenticated(&self) -> ProviderFuture<'_, bool>;

	/// Discards held credentials.
	fn clear_tokens(&self) -> ProviderFuture<'_, ()>;
}
impl<P> TokenProvider for Arc<P>
where
	P: ?Sized + TokenProvider,
{
	fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
		(**self).access_token()
	}

	fn refresh(&self) -> ProviderFuture<'_, Credential> {
		(**self).refresh()
	}

	fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
		(**self).is_authenticated()
	}

	fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
		(**self).clear_tokens()
	}
}
