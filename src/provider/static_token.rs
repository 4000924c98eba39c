// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	provider::{ProviderFuture, TokenProvider},
};

/// Serves a caller-managed credential and never contacts a token endpoint.
///
/// [`refresh`](TokenProvider::refresh) fails with [`Error::Unauthenticated`] once the
/// credential is gone or expired; swap in a new one with [`replace`](Self::replace).
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
	credential: RwLock<Option<Credential>>,
}
impl StaticTokenProvider {
	/// Wraps an existing credential.
	pub fn new(credential: Credential) -> Self {
		Self { credential: RwLock::new(Some(credential)) }
	}

	/// Wraps a bare access token valid for `lifetime`.
	pub fn bearer(token: impl Into<String>, lifetime: Duration) -> Result<Self> {
		let credential = Credential::builder()
			.access_token(token)
			.expires_in(lifetime)
			.build()
			.map_err(crate::error::ConfigError::from)?;

		Ok(Self::new(credential))
	}

	/// Replaces the held credential.
	pub fn replace(&self, credential: Credential) {
		*self.credential.write() = Some(credential);
	}

	fn current(&self) -> Result<Credential> {
		self.credential
			.read()
			.as_ref()
			.filter(|credential| !credential.is_expired())
			.cloned()
			.ok_or_else(|| Error::Unauthenticated { reason: "static credential is missing or expired".into() })
	}
}
impl TokenProvider for StaticTokenProvider {
	fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
		Box::pin(async move { Ok(self.current()?.access_token) })
	}

	fn refresh(&self) -> ProviderFuture<'_, Credential> {
		Box::pin(async move { self.current() })
	}

	fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
		Box::pin(async move { Ok(self.current().is_ok()) })
	}

	fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
		Box::pin(async move {
			self.credential.write().take();

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn serves_until_cleared() {
		let provider = StaticTokenProvider::bearer("static-token", Duration::from_secs(3600))
			.expect("Static provider should build.");

		assert_eq!(
			provider.access_token().await.expect("Token should be served.").expose(),
			"static-token"
		);
		assert!(provider.is_authenticated().await.expect("Check should succeed."));

		provider.clear_tokens().await.expect("Clear should succeed.");

		assert!(matches!(provider.access_token().await, Err(Error::Unauthenticated { .. })));
		assert!(matches!(provider.refresh().await, Err(Error::Unauthenticated { .. })));
	}
}
