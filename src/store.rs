//! Credential persistence contract and built-in stores.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccountId, Credential, Namespace},
};

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Scoped persistence for credentials.
///
/// Implementations must be safe to share across tasks; providers serialize their own writes
/// through a single-flight slot and a write epoch, so stores only need per-call atomicity.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the credential stored under `key`.
	fn save<'a>(&'a self, key: &'a StoreKey, credential: Credential) -> StoreFuture<'a, ()>;

	/// Fetches the credential stored under `key`, if present.
	fn fetch<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Credential>>;

	/// Removes the credential stored under `key`; returns `true` if one existed.
	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool>;

	/// Returns `true` if no credential is stored or the stored one is within the expiry buffer.
	fn is_expired<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.fetch(key).await?.is_none_or(|credential| credential.is_expired()))
		})
	}
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Location of one credential: a namespace plus an account within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
	/// Namespace component (application or client).
	pub namespace: Namespace,
	/// Account component (user label or effective identity).
	pub account: AccountId,
}
impl StoreKey {
	/// Builds a key from validated components.
	pub fn new(namespace: Namespace, account: AccountId) -> Self {
		Self { namespace, account }
	}

	/// Builds a key from raw strings, validating both components.
	pub fn parse(namespace: &str, account: &str) -> Result<Self> {
		Ok(Self {
			namespace: Namespace::new(namespace).map_err(crate::error::ConfigError::from)?,
			account: AccountId::new(account).map_err(crate::error::ConfigError::from)?,
		})
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.namespace, self.account)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "keychain locked".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("keychain locked"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn store_key_validates_and_displays() {
		let key = StoreKey::parse("sheets-app", "user@example.com")
			.expect("Store key fixture should be valid.");

		assert_eq!(key.to_string(), "sheets-app/user@example.com");
		assert!(matches!(StoreKey::parse("sheets app", "user"), Err(Error::Config(_))));
		assert!(StoreKey::parse("sheets-app", "").is_err());
	}

	#[tokio::test]
	async fn default_expiry_predicate_treats_missing_as_expired() {
		let store = MemoryStore::default();
		let key = StoreKey::parse("ns", "acct").expect("Store key fixture should be valid.");

		assert!(store.is_expired(&key).await.expect("Expiry check should succeed."));

		let fresh = Credential::builder()
			.access_token("fresh")
			.expires_in(Duration::from_secs(3600))
			.build()
			.expect("Fresh credential should build.");

		store.save(&key, fresh).await.expect("Save should succeed.");

		assert!(!store.is_expired(&key).await.expect("Expiry check should succeed."));

		let nearly = Credential::builder()
			.access_token("nearly")
			.expires_in(Duration::from_secs(120))
			.build()
			.expect("Short-lived credential should build.");

		store.save(&key, nearly).await.expect("Save should succeed.");

		assert!(
			store.is_expired(&key).await.expect("Expiry check should succeed."),
			"Credentials inside the safety buffer count as expired."
		);
	}
}
